//! Terminal host: prompts on the controlling TTY, notifications on stderr.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use secrecy::SecretString;
use tracing::{error, info, warn};

use sealbox_core::types::{EncryptChoice, PassphraseSource};
use sealbox_engine::{Notifier, Prompter};
use sealbox_secrets::Passphrase;

/// Wrap width for long hardware passphrases
const REVEAL_WIDTH: usize = 64;

pub struct TerminalHost {
    clipboard: PathBuf,
}

impl TerminalHost {
    pub fn new(clipboard: PathBuf) -> Self {
        Self { clipboard }
    }

    fn copy_to_clipboard(&self, passphrase: &Passphrase) -> io::Result<()> {
        // stdin only: argv is visible to every local user
        let mut child = Command::new(&self.clipboard)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(passphrase.expose_secret().as_bytes())?;
        }
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("clipboard tool exited with {status}")))
        }
    }
}

impl Prompter for TerminalHost {
    fn ask_secret(&self, title: &str, text: &str) -> Option<SecretString> {
        match rpassword::prompt_password(format!("{title}: {text} ")) {
            Ok(answer) if answer.is_empty() => None,
            Ok(answer) => Some(SecretString::from(answer)),
            Err(e) => {
                warn!("reading secret from terminal failed: {e}");
                None
            }
        }
    }

    fn reveal_passphrase(&self, passphrase: &Passphrase, source: PassphraseSource) -> EncryptChoice {
        let origin = match source {
            PassphraseSource::Wordlist => "wordlist",
            PassphraseSource::Hardware => "hardware token",
        };
        eprintln!(
            "A {}-character passphrase was generated ({origin}).",
            passphrase.len()
        );
        eprintln!("You cannot decrypt the result without it.");

        if confirm("Show it on screen?") {
            eprintln!();
            for line in wrap(passphrase.expose_secret(), REVEAL_WIDTH) {
                eprintln!("    {line}");
            }
            eprintln!();
        }

        if confirm(&format!("Copy it to the clipboard with {}?", self.clipboard.display())) {
            match self.copy_to_clipboard(passphrase) {
                Ok(()) => eprintln!("Copied."),
                Err(e) => eprintln!("Clipboard copy failed: {e}"),
            }
        }

        let answer = ask_line("Encrypt and [k]eep originals, encrypt and [d]elete originals, or [c]ancel? [k/d/C] ");
        parse_choice(answer.as_deref())
    }
}

impl Notifier for TerminalHost {
    fn notify(&self, title: &str, message: &str) {
        info!(title, "{message}");
        eprintln!("{title}: {message}");
    }

    fn report_error(&self, title: &str, message: &str) {
        error!(title, "{message}");
        eprintln!("error: {title}: {message}");
    }
}

fn ask_line(prompt: &str) -> Option<String> {
    eprint!("{prompt}");
    io::stderr().flush().ok()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

fn confirm(question: &str) -> bool {
    matches!(
        ask_line(&format!("{question} [y/N] ")).as_deref(),
        Some("y" | "Y" | "yes" | "Yes")
    )
}

/// Anything other than an explicit keep/delete cancels.
fn parse_choice(answer: Option<&str>) -> EncryptChoice {
    match answer.map(str::to_ascii_lowercase).as_deref() {
        Some("k" | "keep") => EncryptChoice::KeepOriginals,
        Some("d" | "delete") => EncryptChoice::DeleteOriginals,
        _ => EncryptChoice::Cancel,
    }
}

fn wrap(text: &str, width: usize) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while rest.len() > width {
        let cut = (1..=width).rev().find(|&i| rest.is_char_boundary(i)).unwrap_or(rest.len());
        let (head, tail) = rest.split_at(cut);
        lines.push(head);
        rest = tail;
    }
    lines.push(rest);
    lines
}
