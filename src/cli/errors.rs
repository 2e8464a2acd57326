use crate::errors::FixError;

pub const EXIT_SOFT_FAILURE: i32 = 1;
pub const EXIT_HARD_FAILURE: i32 = 2;

fn soft_failure(error: &anyhow::Error) -> Option<&FixError> {
    error.downcast_ref::<FixError>().filter(|fix| fix.is_soft())
}

pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    if soft_failure(error).is_some() {
        EXIT_SOFT_FAILURE
    } else {
        EXIT_HARD_FAILURE
    }
}

/// Soft failures get their plain message on stdout; everything else is an
/// error chain on stderr.
pub fn render(error: &anyhow::Error) -> String {
    match soft_failure(error) {
        Some(fix) => fix.to_string(),
        None => format!("error: {error:#}"),
    }
}

pub fn emit_error_and_exit(error: anyhow::Error) -> ! {
    if let Some(FixError::NoWorksheets { item_id, payload }) = error.downcast_ref::<FixError>() {
        tracing::warn!(item_id = %item_id, %payload, "uploaded workbook has no worksheets");
    }
    let message = render(&error);
    if soft_failure(&error).is_some() {
        println!("{message}");
    } else {
        eprintln!("{message}");
    }
    std::process::exit(exit_code_for(&error))
}
