use anyhow::{anyhow, Result};
use std::thread;
use std::time::Duration;

use lora_node::device::sim::SimulatedAir;
use lora_node::{NodeConfig, ReliableMessenger};

mod echo_client;
mod echo_server;

const CLIENT_ADDRESS: u16 = 1;
const SERVER_ADDRESS: u16 = 2;
const AIRTIME: Duration = Duration::from_millis(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let air = SimulatedAir::with_airtime(AIRTIME);

    let mut config = NodeConfig::with_node_address(SERVER_ADDRESS)?;
    config.set_automatic_ack(true);
    let server = ReliableMessenger::new(air.attach(), config)
        .map_err(|err| anyhow!("Server setup error!\ncause: {:?}", err))?;

    let mut config = NodeConfig::with_node_address(CLIENT_ADDRESS)?;
    config.set_automatic_ack(true);
    let client = ReliableMessenger::new(air.attach(), config)
        .map_err(|err| anyhow!("Client setup error!\ncause: {:?}", err))?;

    let messages: Vec<Vec<u8>> = vec!["HELO1", "HELO2", "Nice to talk to you over the air!"]
        .into_iter()
        .map(|s| s.as_bytes().to_owned())
        .collect();
    let rounds = messages.len();

    let server = thread::spawn(move || echo_server::EchoServer::new(server).serve(rounds));
    let echoed = echo_client::EchoClient::new(client, SERVER_ADDRESS, messages).run()?;
    let served = server
        .join()
        .map_err(|_| anyhow!("Echo server thread panicked!"))??;

    log::info!("Done: {} echoed, {} served.", echoed, served);
    Ok(())
}
