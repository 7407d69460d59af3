use std::future::Future;
use std::io::IsTerminal;
use std::sync::Arc;

use chrono::Utc;
use sentinel_core::{ClientLogStore, LogSettings};
use sentinel_feed::{FeedCoordinator, FeedPrinter, FeedSettings, SentinelClient};
use sentinel_types::LogLevel;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

pub struct FeedOptions {
    pub once: bool,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FeedCommand {
    TogglePause,
    Refresh,
    Clear,
    Navigate(String),
    Help,
    Quit,
}

impl FeedCommand {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (head, rest) = line
            .split_once(char::is_whitespace)
            .map(|(head, rest)| (head, rest.trim()))
            .unwrap_or((line, ""));
        match head.to_ascii_lowercase().as_str() {
            "p" | "pause" | "resume" => Some(Self::TogglePause),
            "r" | "refresh" => Some(Self::Refresh),
            "c" | "clear" => Some(Self::Clear),
            "g" | "go" if !rest.is_empty() => Some(Self::Navigate(rest.to_string())),
            "h" | "help" | "?" => Some(Self::Help),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

const HELP: &str = "commands: p pause/resume, r refresh, c clear, g <path> navigate, q quit";

pub async fn run(
    client: SentinelClient,
    settings: &LogSettings,
    options: FeedOptions,
) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    follow(client, settings, options, stdin, async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Runs the feed until `shutdown` resolves or a quit command arrives.
/// Closing `input` only stops command handling; polling continues.
async fn follow<R, F>(
    client: SentinelClient,
    settings: &LogSettings,
    options: FeedOptions,
    input: R,
    shutdown: F,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let store = Arc::new(ClientLogStore::new(settings.client_capacity));
    let coordinator = Arc::new(FeedCoordinator::new(
        store.clone(),
        Arc::new(client),
        FeedSettings::from(settings),
    ));
    let mut printer = FeedPrinter::new(std::io::stdout().is_terminal());
    let mut changes = coordinator.subscribe_changes();

    store.append("Application loaded.", LogLevel::Success, None);
    store.record_navigation("/logs");
    coordinator.initialize().await;
    if options.paused {
        coordinator.set_paused(true);
    }
    print_update(&mut printer, &coordinator);
    changes.borrow_and_update();

    if options.once {
        return Ok(());
    }

    println!("{HELP}");
    let polling = coordinator.spawn_polling();
    let mut lines = input.lines();
    let mut input_open = true;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                changes.borrow_and_update();
                print_update(&mut printer, &coordinator);
            }
            line = lines.next_line(), if input_open => {
                let Some(line) = line? else {
                    tracing::debug!("command input closed, following until interrupted");
                    input_open = false;
                    continue;
                };
                match FeedCommand::parse(&line) {
                    Some(FeedCommand::TogglePause) => {
                        coordinator.toggle_pause();
                    }
                    Some(FeedCommand::Refresh) => coordinator.refresh().await,
                    Some(FeedCommand::Clear) => coordinator.clear(),
                    Some(FeedCommand::Navigate(path)) => {
                        store.record_navigation(&path);
                    }
                    Some(FeedCommand::Help) => println!("{HELP}"),
                    Some(FeedCommand::Quit) => break,
                    None if line.trim().is_empty() => {}
                    None => println!("unknown command `{}`. {HELP}", line.trim()),
                }
            }
            _ = &mut shutdown => break,
        }
    }

    polling.shutdown().await;
    coordinator.detach();
    tracing::info!("feed stopped");
    Ok(())
}

fn print_update(printer: &mut FeedPrinter, coordinator: &FeedCoordinator) {
    for line in printer.render_update(&coordinator.snapshot(), Utc::now()) {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn unreachable_client() -> SentinelClient {
        SentinelClient::with_timeout("http://127.0.0.1:9", Duration::from_millis(200))
            .expect("client")
    }

    fn live() -> FeedOptions {
        FeedOptions {
            once: false,
            paused: false,
        }
    }

    #[tokio::test]
    async fn closed_input_keeps_following_until_shutdown() {
        let started = Instant::now();
        follow(
            unreachable_client(),
            &LogSettings::default(),
            live(),
            &b""[..],
            tokio::time::sleep(Duration::from_millis(400)),
        )
        .await
        .expect("feed");
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn quit_command_ends_the_feed_before_shutdown() {
        let finished = tokio::time::timeout(
            Duration::from_secs(10),
            follow(
                unreachable_client(),
                &LogSettings::default(),
                live(),
                &b"p\nq\n"[..],
                tokio::time::sleep(Duration::from_secs(60)),
            ),
        )
        .await;
        assert!(matches!(finished, Ok(Ok(()))));
    }

    #[test]
    fn parses_single_letter_and_word_commands() {
        assert_eq!(FeedCommand::parse("p"), Some(FeedCommand::TogglePause));
        assert_eq!(FeedCommand::parse(" Refresh "), Some(FeedCommand::Refresh));
        assert_eq!(FeedCommand::parse("c"), Some(FeedCommand::Clear));
        assert_eq!(FeedCommand::parse("q"), Some(FeedCommand::Quit));
        assert_eq!(
            FeedCommand::parse("g /roadmap"),
            Some(FeedCommand::Navigate("/roadmap".to_string()))
        );
    }

    #[test]
    fn navigation_needs_a_path() {
        assert_eq!(FeedCommand::parse("g"), None);
        assert_eq!(FeedCommand::parse("launch"), None);
    }
}
