use crate::workflow::RepairOutcome;

pub const BANNER: &str = "
xlsmFix  Copyright (C) 2023  Rohan Moore
This program comes with ABSOLUTELY NO WARRANTY; for details type `show w'.
This is free software, and you are welcome to redistribute it
under certain conditions; type `show c' for details.
";

pub fn print_banner() {
    println!("{BANNER}");
}

pub fn print_outcome(outcome: &RepairOutcome) {
    println!(
        "Repaired {} ({} bytes written)",
        outcome.path.display(),
        outcome.bytes_written
    );
}
