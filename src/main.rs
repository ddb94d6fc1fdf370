use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{info, warn};

use threadlist::config::Config;
use threadlist::grouping::ConversationGroup;
use threadlist::logging;
use threadlist::reconcile::{InboundEvent, Reconciler, ViewScope};
use threadlist::view::{View, ViewListener};

const USAGE: &str = "usage: threadlist <account> <folder> [EVENTS_FILE]\n       threadlist --search <query> [EVENTS_FILE]";

/// Prints every applied grouping pass to stdout.
#[derive(Default)]
struct PrintListener {
    passes: usize,
}

impl ViewListener for PrintListener {
    fn groups_changed(&mut self, groups: &[ConversationGroup]) {
        self.passes += 1;
        println!("-- pass {}: {} groups --", self.passes, groups.len());
        for group in groups {
            let marker = if group.has_flagged() {
                '!'
            } else if group.has_unread() {
                '*'
            } else {
                ' '
            };
            let date = group
                .representative()
                .map(|m| m.date_label.as_str())
                .unwrap_or("");
            println!(
                "{} {:>3} {:>10}  {:<28}  {}",
                marker,
                group.message_count(),
                date,
                truncate(&group.senders(), 28),
                group.subject
            );
        }
    }

    fn busy_state_changed(&mut self, busy: bool) {
        println!("# busy: {}", busy);
    }

    fn selection_count_changed(&mut self, count: usize) {
        if count > 0 {
            println!("# selected: {}", count);
        }
    }

    fn unread_count_changed(&mut self, count: usize) {
        println!("# unread: {}", count);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn parse_args(args: &[String]) -> Result<(ViewScope, Option<String>)> {
    match args {
        [flag, query, rest @ ..] if flag == "--search" && rest.len() <= 1 => Ok((
            ViewScope::Search {
                query: query.clone(),
            },
            rest.first().cloned(),
        )),
        [account, folder, rest @ ..] if !account.starts_with("--") && rest.len() <= 1 => Ok((
            ViewScope::Folder {
                account: account.clone(),
                folder: folder.clone(),
            },
            rest.first().cloned(),
        )),
        _ => bail!("{}", USAGE),
    }
}

/// First line of output. Warns when a folder view names an account the
/// config does not know, since outgoing mail then cannot be recognised.
fn heading(config: &Config, scope: &ViewScope) -> String {
    match scope {
        ViewScope::Folder { account, folder } => match config.account(account) {
            Some(acct) => format!("# {}: {}", account, acct.folder_info(folder).display_name),
            None => {
                warn!(account = %account, "account not in config, using defaults");
                format!("# {}: {}", account, folder)
            }
        },
        ViewScope::Search { query } => format!("# search: {}", query),
    }
}

/// Feed JSON-lines events to the reconciler. Returns how many were applied.
async fn replay<R: AsyncRead + Unpin>(input: R, reconciler: Reconciler) -> Result<usize> {
    let mut lines = BufReader::new(input).lines();
    let mut line_no = 0;
    let mut applied = 0;
    while let Some(line) = lines.next_line().await.context("failed to read events")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(line) {
            Ok(event) => {
                reconciler.handle(event);
                applied += 1;
            }
            Err(e) => warn!(line = line_no, "skipping malformed event: {e}"),
        }
        tokio::task::yield_now().await;
    }
    Ok(applied)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (scope, events_file) = parse_args(&args)?;

    logging::init()?;
    let config = Config::load()?;

    println!("{}", heading(&config, &scope));
    let mut view = View::new(scope, &config, PrintListener::default(), None);
    view.activate();

    let reconciler = view.reconciler().clone();
    let mut producer = match events_file {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open events file {}", path))?;
            tokio::spawn(replay(file, reconciler))
        }
        None => tokio::spawn(replay(tokio::io::stdin(), reconciler)),
    };

    let quiet = config.cooldown() * 2;
    let mut replay_done = false;
    loop {
        tokio::select! {
            result = &mut producer, if !replay_done => {
                replay_done = true;
                let applied = result.context("replay task failed")??;
                info!(applied, "replay finished");
            }
            _ = view.process_next() => {}
            _ = tokio::time::sleep(quiet), if replay_done => {
                if view.is_settled() {
                    break;
                }
            }
        }
    }

    info!(generation = view.generation(), "view settled");
    println!(
        "# final: {} groups, {} unread",
        view.groups().len(),
        view.unread_count()
    );
    view.deactivate();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_folder_args() {
        let (scope, file) = parse_args(&args(&["work", "INBOX", "events.jsonl"])).unwrap();
        assert_eq!(
            scope,
            ViewScope::Folder {
                account: "work".into(),
                folder: "INBOX".into()
            }
        );
        assert_eq!(file.as_deref(), Some("events.jsonl"));
    }

    #[test]
    fn parse_search_args() {
        let (scope, file) = parse_args(&args(&["--search", "from:bob"])).unwrap();
        assert!(scope.is_search());
        assert!(file.is_none());
    }

    #[test]
    fn parse_bad_args() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["work"])).is_err());
        assert!(parse_args(&args(&["--bogus", "x"])).is_err());
        assert!(parse_args(&args(&["a", "b", "c", "d"])).is_err());
    }

    #[test]
    fn heading_uses_configured_folder_names() {
        let config: Config = toml::from_str(
            r#"
            [[accounts]]
            name = "work"
            "#,
        )
        .unwrap();
        let scope = |account: &str, folder: &str| ViewScope::Folder {
            account: account.into(),
            folder: folder.into(),
        };
        assert_eq!(heading(&config, &scope("work", "INBOX")), "# work: Inbox");
        assert_eq!(heading(&config, &scope("home", "INBOX")), "# home: INBOX");
        assert_eq!(
            heading(&config, &ViewScope::Search { query: "from:bob".into() }),
            "# search: from:bob"
        );
    }

    #[test]
    fn truncate_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
