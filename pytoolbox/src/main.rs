fn main() -> anyhow::Result<()> {
    pytoolbox::run_cli()
}
