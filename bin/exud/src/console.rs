//! ---
//! exu_section: "01-core-functionality"
//! exu_subsection: "binary"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Terminal notification sink for the extension update daemon."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use exu_core::{EngineStatus, LogNotificationSink, NotificationSink, PendingUpdate};

/// Prints user-facing messages to stdout and mirrors them into the log.
#[derive(Debug, Default)]
pub struct ConsoleNotificationSink {
    log: LogNotificationSink,
}

impl NotificationSink for ConsoleNotificationSink {
    fn updates_available(&self, updates: &[PendingUpdate]) {
        self.log.updates_available(updates);
        println!("Extension updates available:");
        print_pending(updates);
        println!("Type `update` to install them or `ignore` to skip this round.");
    }

    fn batch_started(&self) {
        self.log.batch_started();
        println!("Updating extensions...");
    }

    fn item_succeeded(&self, update: &PendingUpdate) {
        self.log.item_succeeded(update);
        println!("  '{}' updated", update.display_name);
    }

    fn item_failed(&self, update: &PendingUpdate, message: &str) {
        self.log.item_failed(update, message);
        println!("  '{}' failed: {message}", update.display_name);
        println!("  Type `retry {}` to try again.", update.id);
    }

    fn batch_finished(&self, all_succeeded: bool) {
        self.log.batch_finished(all_succeeded);
        if all_succeeded {
            println!("Extensions updated.");
        } else {
            println!("Failed to update some extensions.");
        }
    }
}

pub fn print_pending(updates: &[PendingUpdate]) {
    for update in updates {
        match &update.target_version_tag {
            Some(tag) => println!("  {} ({}) -> {tag}", update.display_name, update.id),
            None => println!("  {} ({})", update.display_name, update.id),
        }
    }
}

pub fn print_status(status: &EngineStatus) {
    println!("Tracked extensions: {}", status.tracked.len());
    if !status.pending.is_empty() {
        let state = if status.batch_in_flight {
            "in progress"
        } else {
            "waiting"
        };
        println!("Pending updates ({state}):");
        print_pending(&status.pending);
    }
    if !status.failed.is_empty() {
        println!("Failed updates:");
        print_pending(&status.failed);
    }
    match status.next_check_in {
        Some(delay) => println!("Next check in {}s", delay.as_secs()),
        None if status.check_in_flight => println!("Check running"),
        None => println!("No check scheduled"),
    }
}
