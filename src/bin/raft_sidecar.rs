//! Entry point for the Raft leader-election sidecar. Reads `NODE_ID`,
//! `PORT`, `PEERS` from the environment (§6/§10.2), starts a `RaftNode`, and
//! serves its RPC surface until killed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

use rideshare_raft_sidecar::common::Timing;
use rideshare_raft_sidecar::config::Config;
use rideshare_raft_sidecar::raft::RaftNode;
use rideshare_raft_sidecar::rpc::RpcServer;

fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let node_id = config.node_id.clone();
    let node = RaftNode::new(config.node_id, config.peers, Timing::default(), |op: &[u8]| {
        log::info!("applying committed entry ({} bytes)", op.len());
    });

    let mut server = RpcServer::new_with_services(node.rpc_services());
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
    server.bind(bind_addr).unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));
    server.repl().expect("failed to start rpc accept loop");

    log::info!("{node_id} listening on {bind_addr}");

    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}
