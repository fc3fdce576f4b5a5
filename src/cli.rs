use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "pushbox")]
#[command(about = "Image-host upload sidecar", long_about = None)]
pub struct Cli {
    /// Number of concurrent job workers
    #[arg(short, long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: u32,
}
