use std::time::Duration;

use clap::{Args as ClapArgs, Parser};
use remiro::config::{
    BackendConfig, PoolConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_CHECKOUT_TIMEOUT,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_LISTEN, DEFAULT_POOL_MAX,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
use remiro::frame::Limits;
use remiro::{server, Config, Error};

/// Redis protocol proxy that moves keys from a source to a destination as clients touch them.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Address to accept clients on
    #[arg(short, long, env = "REMIRO_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Redis being migrated away from. Without it every key is served by the destination
    #[arg(short, long, env = "REMIRO_SOURCE")]
    source: Option<String>,

    /// Redis being migrated to
    #[arg(short, long, env = "REMIRO_DESTINATION")]
    destination: String,

    /// Delete a key from the source once a GET has copied it to the destination
    #[arg(long, env = "REMIRO_DELETE_ON_GET")]
    delete_on_get: bool,

    /// Delete a key from the source once a SET or DEL has reached the destination
    #[arg(long, env = "REMIRO_DELETE_ON_SET")]
    delete_on_set: bool,

    /// Treat an error reply to GET from the destination as a miss and ask the source
    #[arg(long, env = "REMIRO_GET_FALLBACK_ON_ERROR")]
    get_fallback_on_error: bool,

    /// Deadline in milliseconds for routing a command and writing its reply
    #[arg(
        long,
        env = "REMIRO_COMMAND_TIMEOUT_MS",
        default_value_t = DEFAULT_COMMAND_TIMEOUT.as_millis() as u64
    )]
    command_timeout_ms: u64,

    /// How long in milliseconds open connections get to finish on shutdown
    #[arg(
        long,
        env = "REMIRO_SHUTDOWN_TIMEOUT_MS",
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64
    )]
    shutdown_timeout_ms: u64,

    /// Largest bulk string accepted from clients and backends, in bytes
    #[arg(long, env = "REMIRO_MAX_BULK_LEN", default_value_t = Limits::default().max_bulk_len)]
    max_bulk_len: usize,

    /// Largest number of elements accepted in an array
    #[arg(long, env = "REMIRO_MAX_ARRAY_LEN", default_value_t = Limits::default().max_array_len)]
    max_array_len: usize,

    #[command(flatten)]
    source_pool: SourcePoolArgs,

    #[command(flatten)]
    destination_pool: DestinationPoolArgs,
}

#[derive(ClapArgs, Debug)]
struct SourcePoolArgs {
    /// Maximum open connections to the source
    #[arg(
        long = "source-pool-max",
        env = "REMIRO_SOURCE_POOL_MAX",
        default_value_t = DEFAULT_POOL_MAX
    )]
    max: usize,

    /// Milliseconds an idle source connection is kept
    #[arg(
        long = "source-idle-timeout-ms",
        env = "REMIRO_SOURCE_IDLE_TIMEOUT_MS",
        default_value_t = DEFAULT_IDLE_TIMEOUT.as_millis() as u64
    )]
    idle_timeout_ms: u64,

    /// Milliseconds to wait for a free source connection
    #[arg(
        long = "source-checkout-timeout-ms",
        env = "REMIRO_SOURCE_CHECKOUT_TIMEOUT_MS",
        default_value_t = DEFAULT_CHECKOUT_TIMEOUT.as_millis() as u64
    )]
    checkout_timeout_ms: u64,

    /// Milliseconds allowed for one call to the source
    #[arg(
        long = "source-call-timeout-ms",
        env = "REMIRO_SOURCE_CALL_TIMEOUT_MS",
        default_value_t = DEFAULT_CALL_TIMEOUT.as_millis() as u64
    )]
    call_timeout_ms: u64,
}

#[derive(ClapArgs, Debug)]
struct DestinationPoolArgs {
    /// Maximum open connections to the destination
    #[arg(
        long = "destination-pool-max",
        env = "REMIRO_DESTINATION_POOL_MAX",
        default_value_t = DEFAULT_POOL_MAX
    )]
    max: usize,

    /// Milliseconds an idle destination connection is kept
    #[arg(
        long = "destination-idle-timeout-ms",
        env = "REMIRO_DESTINATION_IDLE_TIMEOUT_MS",
        default_value_t = DEFAULT_IDLE_TIMEOUT.as_millis() as u64
    )]
    idle_timeout_ms: u64,

    /// Milliseconds to wait for a free destination connection
    #[arg(
        long = "destination-checkout-timeout-ms",
        env = "REMIRO_DESTINATION_CHECKOUT_TIMEOUT_MS",
        default_value_t = DEFAULT_CHECKOUT_TIMEOUT.as_millis() as u64
    )]
    checkout_timeout_ms: u64,

    /// Milliseconds allowed for one call to the destination
    #[arg(
        long = "destination-call-timeout-ms",
        env = "REMIRO_DESTINATION_CALL_TIMEOUT_MS",
        default_value_t = DEFAULT_CALL_TIMEOUT.as_millis() as u64
    )]
    call_timeout_ms: u64,
}

fn pool(
    max: usize,
    idle_timeout_ms: u64,
    checkout_timeout_ms: u64,
    call_timeout_ms: u64,
) -> PoolConfig {
    PoolConfig {
        max,
        idle_timeout: Duration::from_millis(idle_timeout_ms),
        checkout_timeout: Duration::from_millis(checkout_timeout_ms),
        call_timeout: Duration::from_millis(call_timeout_ms),
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Config {
        let source_pool = pool(
            args.source_pool.max,
            args.source_pool.idle_timeout_ms,
            args.source_pool.checkout_timeout_ms,
            args.source_pool.call_timeout_ms,
        );
        let destination_pool = pool(
            args.destination_pool.max,
            args.destination_pool.idle_timeout_ms,
            args.destination_pool.checkout_timeout_ms,
            args.destination_pool.call_timeout_ms,
        );

        Config {
            listen: args.listen,
            source: args.source.map(|addr| BackendConfig {
                addr,
                pool: source_pool,
            }),
            destination: BackendConfig {
                addr: args.destination,
                pool: destination_pool,
            },
            delete_on_get: args.delete_on_get,
            delete_on_set: args.delete_on_set,
            get_fallback_on_error: args.get_fallback_on_error,
            command_timeout: Duration::from_millis(args.command_timeout_ms),
            shutdown_timeout: Duration::from_millis(args.shutdown_timeout_ms),
            limits: Limits {
                max_bulk_len: args.max_bulk_len,
                max_array_len: args.max_array_len,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    server::run(args.into()).await
}
