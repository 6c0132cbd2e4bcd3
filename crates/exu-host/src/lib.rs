//! ---
//! exu_section: "06-host-integration"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Filesystem-backed component host."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
//! A [`ComponentHost`](exu_core::ComponentHost) over plain directories. Each
//! extension lives in `<root>/<uuid>/` and describes itself in a
//! `metadata.json` file.

pub mod archive;
pub mod local;

pub use archive::{pack_directory, unpack_into, zip_directory, ArtifactFormat};
pub use local::{ExtensionMetadata, LocalExtensionHost, METADATA_FILE};
