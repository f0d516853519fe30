pub fn run() -> anyhow::Result<()> {
    println!("kuberhealthy {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
