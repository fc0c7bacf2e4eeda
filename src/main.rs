use std::sync::Arc;

use clap::{Parser, Subcommand};
use lorawan_ns_core::backends::{RecordingApplicationBackend, StaticJoinBackend};
use lorawan_ns_core::band::Eu868BandPlan;
use lorawan_ns_core::config::Config;
use lorawan_ns_core::gateway::{ChannelGatewayBackend, UplinkFrame};
use lorawan_ns_core::logging::{init_logger, log_info};
use lorawan_ns_core::server::NetworkServer;
use lorawan_ns_core::session::InMemorySessionStore;
use lorawan_ns_core::types::{DataRate, GatewayId, RxInfo, TxInfo};
use lorawan_ns_core::NsError;

#[derive(Parser)]
#[command(name = "lorawan-ns")]
#[command(about = "LoRaWAN network server core: dedup, MAC engine, RX1/RX2 scheduling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the server wired to in-memory gateway/application/join
    /// backends, feeds it one join request and one data-up frame, then
    /// shuts down. Demonstrates the pipeline without real gateway hardware.
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), NsError> {
    init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo => run_demo().await,
    }
}

async fn run_demo() -> Result<(), NsError> {
    let store = Arc::new(InMemorySessionStore::new());
    let application = Arc::new(RecordingApplicationBackend::new());
    let join_backend = Arc::new(StaticJoinBackend::new());
    let band = Arc::new(Eu868BandPlan);
    let config = Config::default();

    let (downlink_tx, mut downlink_rx) = tokio::sync::mpsc::channel(16);
    let gateway = Arc::new(ChannelGatewayBackend::new(downlink_tx));

    let (uplink_tx, uplink_rx) = tokio::sync::mpsc::channel(16);
    let (_ack_tx, ack_rx) = tokio::sync::mpsc::channel(16);

    let server = NetworkServer::start(
        store,
        application,
        join_backend,
        gateway,
        band,
        config,
        uplink_rx,
        ack_rx,
    );

    let gateway_id = GatewayId([0xAA; 8]);
    let rx_info = RxInfo { gateway_id, rssi: -70, lora_snr: 8.0, board: 0, antenna: 0, context: Vec::new() };
    let tx_info = TxInfo { frequency_hz: 868_100_000, data_rate: DataRate::Lora { spreading_factor: 7, bandwidth_khz: 125 } };

    let mut join_request = vec![0x00u8]; // MHDR: JoinRequest
    join_request.extend_from_slice(&[0u8; 8]); // JoinEUI
    join_request.extend_from_slice(&[1u8; 8]); // DevEUI
    join_request.extend_from_slice(&[0x01, 0x00]); // DevNonce
    join_request.extend_from_slice(&[0u8; 4]); // placeholder MIC

    uplink_tx
        .send(UplinkFrame { phy_payload: join_request, rx_info, tx_info })
        .await
        .map_err(|e| NsError::Transient(format!("uplink channel closed: {e}")))?;

    if let Some(downlink) = downlink_rx.recv().await {
        log_info(&format!("join-accept scheduled: gateway={} token={:04x}", downlink.gateway_id, downlink.token));
    }

    server.shutdown().await;
    Ok(())
}
