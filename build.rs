//! Renders man pages for `muxwire` and each of its subcommands.

use std::{fs, io, path::Path};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn render(page: Man, dir: &Path, file: &str) -> io::Result<()> {
    let mut buf = Vec::new();
    page.render(&mut buf)?;
    fs::write(dir.join(file), buf)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let dir = Path::new("target/generated-man");
    fs::create_dir_all(dir)?;

    let command = cli::Cli::command();
    let name = command.get_name().to_owned();
    for sub in command.get_subcommands() {
        let sub_name = format!("{name}-{}", sub.get_name());
        let page = Man::new(sub.clone()).title(sub_name.to_uppercase());
        render(page, dir, &format!("{sub_name}.1"))?;
    }
    render(Man::new(command), dir, &format!("{name}.1"))?;
    Ok(())
}
