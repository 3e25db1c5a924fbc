use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use sparrow_billing::{
    BillingConfig, DriverCommand, EngineState, RideAssignment, RideEvent, RideHandle, RidePhase,
    utils::telemetry,
};

// Drives one ride from stdin commands and prints its events as JSON lines.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BillingConfig::from_env()?;
    telemetry::init_tracing(config.log_level);

    let mut args = std::env::args().skip(1);
    let (Some(ride_id), Some(driver_id), Some(passenger_id)) = (args.next(), args.next(), args.next()) else {
        eprintln!("usage: sparrow-billing <ride_id> <driver_id> <passenger_id>");
        std::process::exit(2);
    };

    let engine = EngineState::new(config).await?;
    let ride = engine
        .open_ride(RideAssignment {
            ride_id,
            driver_id,
            passenger_id,
        })
        .await?;
    tracing::info!("Ride {} open; commands: arrive disable reenable pause resume paid complete abandon view", ride.ride_id());

    let mut events = ride.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RideEvent::Updated(_)) => {}
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if matches!(event, RideEvent::Completed(_) | RideEvent::PhaseChanged { to: RidePhase::Abandoned, .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!("Event stream lagged, skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => run_command(&ride, line.trim()).await?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, saving ride state");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn run_command(ride: &RideHandle, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let command = match input {
        "" => return Ok(()),
        "view" => {
            match ride.view().await {
                Ok(view) => println!("{}", serde_json::to_string(&view)?),
                Err(e) => eprintln!("view failed: {}", e),
            }
            return Ok(());
        }
        "complete" => {
            match ride.complete().await {
                Ok(outcome) => println!("{}", serde_json::to_string(&outcome.record)?),
                Err(e) => eprintln!("complete failed: {}", e),
            }
            return Ok(());
        }
        "arrive" => DriverCommand::ArriveAtPickup,
        "disable" => DriverCommand::DisableWaiting,
        "reenable" => DriverCommand::ReenableWaiting,
        "pause" => DriverCommand::Pause,
        "resume" => DriverCommand::Resume,
        "paid" => DriverCommand::ConfirmPayment,
        "abandon" => DriverCommand::Abandon,
        other => {
            eprintln!("unknown command: {}", other);
            return Ok(());
        }
    };

    if let Err(e) = ride.apply(command).await {
        eprintln!("{:?} rejected: {}", command, e);
    }
    Ok(())
}
