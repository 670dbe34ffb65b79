use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use log::info;

use cmpack_installer::{LicenseChoice, LicensePrompt};

/// License confirmation on the terminal. The license text and prompt
/// are always echoed; non-interactive runs then decline automatically,
/// since nobody is there to consent.
pub struct ConsolePrompt;

impl LicensePrompt for ConsolePrompt {
    fn display(&self, title: &str, body: &str) -> Result<LicenseChoice> {
        println!("*** {title} ***");
        println!();
        println!("{}", body.replace('\r', ""));
        println!();
        print!("License Agreement: [A]ccept [D]ecline [E]xtract: ");
        io::stdout().flush().context("failed to flush stdout")?;

        if !io::stdin().is_terminal() {
            println!();
            info!("non-interactive terminal, declining the license");
            return Ok(LicenseChoice::Decline);
        }

        let mut input = String::new();
        io::stdin()
            .lock()
            .read_line(&mut input)
            .context("failed to read the license answer")?;
        Ok(parse_license_answer(&input))
    }
}

pub fn parse_license_answer(input: &str) -> LicenseChoice {
    match input.trim().to_ascii_lowercase().as_str() {
        "a" | "accept" => LicenseChoice::Agree,
        "e" | "extract" => LicenseChoice::Extract,
        _ => LicenseChoice::Decline,
    }
}
