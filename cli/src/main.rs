use clap::Parser;
use featureboard_cli::FeatureboardCli;

fn main() -> anyhow::Result<()> {
    FeatureboardCli::parse().run()
}
