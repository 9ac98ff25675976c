use adax_cloud::{DeviceClient, MessageLogMode};
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> adax_cloud::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let account = args.get(1).expect("usage: monitor <account id> [--log <path>]");
    let password = env::var("ADAX_PASSWORD").expect("set ADAX_PASSWORD");
    let log_path = args
        .iter()
        .position(|a| a == "--log")
        .and_then(|i| args.get(i + 1));

    let mut builder = DeviceClient::builder(account.as_str(), password)
        .on_event(|event| {
            println!("{event:?}");
        })
        .on_snapshot(|rooms| {
            for room in rooms {
                println!(
                    "[{}] {} | target {} | {}",
                    room.name,
                    room.temperature,
                    room.target_temperature,
                    room.mode().as_str(),
                );
            }
        });

    if let Some(path) = log_path {
        builder = builder.message_log(MessageLogMode::Diffed, path);
    }

    let client = builder.build()?;

    println!("Logging in as {account}...");
    let rooms = client.list_rooms().await?;
    println!("Found {} rooms. Polling for updates...", rooms.len());

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        if let Err(e) = client.refresh(false).await {
            eprintln!("Refresh error: {e}");
        }
    }
}
