use anyhow::Result;

fn main() -> Result<()> {
    notenanny_cli::cli::run_from_env()
}
