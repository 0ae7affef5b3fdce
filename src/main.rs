//! robotasknet - demo entry point
//!
//! Registers a demo robot, drives one task through the full lifecycle and
//! prints every intermediate snapshot as JSON.

use robotasknet::{config::Config, DemoRequest, RegisterRobot, RoboTaskNet};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_WALLET: &str = "0xR0B0T";

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean JSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "robotasknet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: store={:?} digest={:?} policy={:?}",
        config.store_type, config.digest, config.claim_policy
    );

    let sdk = RoboTaskNet::new(config).await?;

    sdk.registry()
        .register(RegisterRobot {
            wallet: DEMO_WALLET.to_string(),
            public_key: "demo-public-key".to_string(),
            metadata_uri: "ipfs://robot-profile".to_string(),
            capabilities: vec!["delivery".to_string(), "inspection".to_string()],
        })
        .await?;

    let outcome = sdk
        .demo_flow(DemoRequest {
            title: "Deliver parcel".to_string(),
            description: "Carry a parcel from dock 3 to bay 7".to_string(),
            reward_amount: 100,
            robot_wallet: DEMO_WALLET.to_string(),
            telemetry_entries: vec![
                json!({"t": 0, "pos": [0, 0], "battery": 98}),
                json!({"t": 1, "pos": [4, 2], "battery": 96}),
                json!({"t": 2, "pos": [9, 7], "battery": 93, "event": "dropoff"}),
            ],
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
