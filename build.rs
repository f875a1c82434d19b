//! Build script rendering the `azrig` man pages.
//!
//! Writes `azrig.1` plus one `azrig-<pass>.1` page per subcommand into
//! `OUT_DIR` for the packaging pipeline.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(man: &Man, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    fs::write(path, buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR was not set")?);

    let command = Cli::command();
    for pass in command.get_subcommands() {
        let page = format!("azrig-{}", pass.get_name());
        let man = Man::new(pass.clone()).title(page.to_uppercase());
        render(&man, &out_dir.join(format!("{page}.1")))?;
    }
    render(&Man::new(command), &out_dir.join("azrig.1"))
}
