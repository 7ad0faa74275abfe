use hvd::cli::{self, Args};

fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;

    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .init();

    cli::run(args)
}
