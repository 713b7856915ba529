//! Build script for the `sharesnap` man pages.
//!
//! Renders `sharesnap.1` for the top-level command, covering configuration
//! sources and exit status, plus `sharesnap-run.1` and `sharesnap-list.1` for
//! the subcommands. Pages land in the build output directory for packaging.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    write_page(&out_dir, "sharesnap", Man::new(command.clone()))?;
    for subcommand in command.get_subcommands() {
        let page = format!("sharesnap-{}", subcommand.get_name());
        let man = Man::new(subcommand.clone()).title(page.to_uppercase());
        write_page(&out_dir, &page, man)?;
    }

    Ok(())
}

fn write_page(out_dir: &Path, page: &str, man: Man) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    let mut file = File::create(out_dir.join(format!("{page}.1")))?;
    file.write_all(&buffer)?;
    Ok(())
}
