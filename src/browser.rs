use anyhow::{Context, Result};
use reqwest::Url;
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command;

/// Hands the sign-in URL to the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &Url) -> Result<()>;
}

/// Opens the platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> Result<()> {
        let (program, args) = opener_command(url.as_str());
        tracing::debug!(program, "opening sign-in page");
        Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch browser via {program}"))?;
        Ok(())
    }
}

#[cfg(target_os = "windows")]
fn opener_command(url: &str) -> (&'static str, Vec<String>) {
    // `cmd /C start` would reinterpret the `&` separators in the query.
    (
        "rundll32",
        vec!["url.dll,FileProtocolHandler".into(), url.to_string()],
    )
}

#[cfg(target_os = "macos")]
fn opener_command(url: &str) -> (&'static str, Vec<String>) {
    ("open", vec![url.to_string()])
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn opener_command(url: &str) -> (&'static str, Vec<String>) {
    ("xdg-open", vec![url.to_string()])
}

/// Prints the URL for headless sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintUrl;

impl BrowserLauncher for PrintUrl {
    fn open(&self, url: &Url) -> Result<()> {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        writeln!(handle, "Open this URL in a browser to sign in:\n{url}")?;
        Ok(())
    }
}
