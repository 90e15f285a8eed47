use anyhow::Result;

fn main() -> Result<()> {
    nimble_runner::cli::run()
}
