//! Winterhold closed-loop benchmark executable, driving a simulated
//! cluster of the chosen protocol for a fixed span of simulated time.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;

use env_logger::Env;

use winterhold::{
    parsed_config, pf_error, pf_info, unreplicated, vr, BasicClient,
    ClientProtocol, ClusterConfig, Data, GenericClient, InvokeCallback,
    ListLog, MockApp, SimulatedTransport, SmrProtocol, Transport,
    UnreplicatedReplica, WinterholdError,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Name of SMR protocol to benchmark.
    #[arg(short, long, default_value_t = String::from("Vr"))]
    protocol: String,

    /// Number of replica faults tolerated; the cluster holds 2f + 1
    /// replicas (must be 0 for Unreplicated).
    #[arg(short = 'f', long, default_value_t = 1)]
    n_fault: usize,

    /// Number of closed-loop clients.
    #[arg(short = 'c', long, default_value_t = 10)]
    n_client: usize,

    /// Simulated benchmark duration in millisecs.
    #[arg(short, long, default_value_t = 1000)]
    duration_ms: u64,

    /// Protocol-specific configuration in TOML format.
    /// Example: '--config batch_size=10'.
    #[arg(long)]
    config: Option<String>,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(protocol)` on success
    /// or `Err(WinterholdError)` on any error.
    fn sanitize(&self) -> Result<SmrProtocol, WinterholdError> {
        if self.n_client == 0 {
            return Err(WinterholdError(format!(
                "invalid n_client {}",
                self.n_client
            )));
        }
        if self.duration_ms == 0 {
            return Err(WinterholdError(format!(
                "invalid duration_ms {}",
                self.duration_ms
            )));
        }
        let protocol =
            SmrProtocol::parse_name(&self.protocol).ok_or_else(|| {
                WinterholdError(format!(
                    "protocol name '{}' unrecognized",
                    self.protocol
                ))
            })?;
        if protocol == SmrProtocol::Unreplicated && self.n_fault != 0 {
            return Err(WinterholdError(format!(
                "Unreplicated tolerates no faults, n_fault = {}",
                self.n_fault
            )));
        }
        Ok(protocol)
    }
}

/// Builds the callback chain that keeps one client looping.
fn closed_loop<P: ClientProtocol>(
    client: Rc<RefCell<BasicClient<SimulatedTransport, P>>>,
    n_done: Rc<Cell<u64>>,
) -> InvokeCallback<SimulatedTransport> {
    Box::new(move |transport, _result| {
        n_done.set(n_done.get() + 1);
        let callback = closed_loop(client.clone(), n_done.clone());
        client.borrow_mut().invoke(transport, Data::new(), callback);
    })
}

/// Spawns clients, runs the simulation for `duration`, and returns the
/// number of completed invocations.
fn drive<P: ClientProtocol>(
    transport: &mut SimulatedTransport,
    n_client: usize,
    duration: Duration,
) -> u64 {
    let n_done = Rc::new(Cell::new(0));
    let clients: Vec<_> = (0..n_client)
        .map(|_| BasicClient::<_, P>::new_and_setup(transport))
        .collect();
    for client in &clients {
        let callback = closed_loop(client.clone(), n_done.clone());
        client
            .borrow_mut()
            .invoke(transport, Data::new(), callback);
    }
    transport.schedule(
        duration,
        Box::new(|transport| transport.terminate()),
    );
    transport.run();
    n_done.get()
}

// Benchmark executable main entrance.
fn bench_main() -> Result<(), WinterholdError> {
    let args = CliArgs::parse();
    let protocol = args.sanitize()?;

    let n_replica = 2 * args.n_fault + 1;
    let addresses =
        (0..n_replica).map(|i| format!("replica-{}", i)).collect();
    let mut transport = SimulatedTransport::new(ClusterConfig::new(
        args.n_fault,
        addresses,
    ));
    // a simulated second can take much longer than a wall second to churn
    transport.set_wall_clock_limit(Duration::from_secs(600));

    let apps: Vec<_> = (0..n_replica)
        .map(|_| Rc::new(RefCell::new(MockApp::new())))
        .collect();
    let duration = Duration::from_millis(args.duration_ms);

    pf_info!(
        "benchmarking {:?}: {} replicas, {} clients, {} ms",
        protocol,
        n_replica,
        args.n_client,
        args.duration_ms
    );

    let n_done = match protocol {
        SmrProtocol::Unreplicated => {
            let _replica = UnreplicatedReplica::new_and_setup(
                &mut transport,
                ListLog::new(apps[0].clone()),
            );
            drive::<unreplicated::ReplicaMessage>(
                &mut transport,
                args.n_client,
                duration,
            )
        }
        SmrProtocol::Vr => {
            let config = parsed_config!(args.config.as_deref() => vr::ReplicaConfigVr;
                                        batch_size, idle_commit_interval_ms,
                                        view_change_timeout_ms)?;
            for id in 0..n_replica {
                vr::VrReplica::new_and_setup(
                    &mut transport,
                    id as i8,
                    config.clone(),
                    ListLog::new(apps[id].clone()),
                )?;
            }
            drive::<vr::ReplicaMessage>(
                &mut transport,
                args.n_client,
                duration,
            )
        }
    };

    let throughput = n_done as f64 * 1000.0 / args.duration_ms as f64;
    println!(
        "{} invocations in {} ms simulated ({:.1} ops/sec)",
        n_done, args.duration_ms, throughput
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_module_path(true)
        .format_target(false)
        .init();

    if let Err(e) = bench_main() {
        pf_error!("bench_main exitted: {}", e);
    }
}
