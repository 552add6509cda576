use anyhow::Result;
use clap::Parser;
use tracing::Level;

use kiln_server::{Server, TableSpec};

#[derive(Parser, Debug)]
#[command(name = "kiln-server", about = "Serve an in-memory backend for local development")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:5454")]
    bind: String,

    #[arg(long, default_value = kiln_server::server::DEFAULT_ANON_KEY)]
    anon_key: String,

    #[arg(long, default_value = "public")]
    schema: String,

    /// Table to serve. Repeat for more tables.
    #[arg(long = "table", value_name = "NAME")]
    tables: Vec<String>,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = kiln_server::server::DEFAULT_TOKEN_TTL)]
    token_ttl: i64,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    let mut builder = Server::builder().bind_address(args.bind).anon_key(args.anon_key).schema(args.schema).token_ttl(args.token_ttl);
    for table in args.tables {
        builder = builder.table(TableSpec::new(table));
    }
    builder.build()?.run().await
}
