use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wq_core::ElementStatus;
use wq_runner::Runner;

#[derive(Parser)]
#[command(name = "workqueue", version)]
struct Cli {
    /// Queue directory (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a queue (creates .workqueue/, config, catalog, db)
    Init,

    /// Element counts by status
    Status,

    /// List elements
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<ElementStatus>,
        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Cancel open elements
    Cancel {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Recompute the valid sites of an element
    Revalidate { id: String },

    /// Elements stuck in a status longer than the expiry interval
    Expired {
        #[arg(long, value_parser = parse_status, default_value = "Negotiating")]
        status: ElementStatus,
        /// Seconds; defaults to the configured expiry interval
        #[arg(long)]
        interval: Option<i64>,
    },

    /// Fail input files already completed by a sibling element
    Orphans,

    /// Split a workload spec YAML into elements of this queue
    QueueWork { spec: PathBuf },

    /// Run the poller
    Poll {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },
}

fn parse_status(s: &str) -> Result<ElementStatus, String> {
    ElementStatus::from_name(s).ok_or_else(|| format!("unknown status {s}"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    match cli.cmd {
        Command::Init => {
            Runner::init_repo(&root)?;
            println!("Initialized work queue in {}", root.display());
        }
        Command::Status => {
            let r = Runner::open(root)?;
            println!("Queue: {} ({})", r.cfg.queue.name, r.cfg.queue.url);
            println!("Parent: {}", r.cfg.parent.url.as_deref().unwrap_or("-"));
            println!("Execution: {}", if r.execution.is_some() { "in-memory" } else { "none" });
            for (status, n) in r.status_counts()? {
                println!("  {:<12} {}", status, n);
            }
        }
        Command::List { status, json } => {
            let r = Runner::open(root)?;
            for e in r.list(status)? {
                if json {
                    println!("{}", serde_json::to_string(&e)?);
                } else {
                    println!(
                        "- {} [{}] {} {} jobs={} prio={}",
                        e.id,
                        e.status,
                        e.task,
                        e.data_item.as_deref().unwrap_or("-"),
                        e.num_jobs,
                        e.priority
                    );
                }
            }
        }
        Command::Cancel { ids } => {
            let r = Runner::open(root)?;
            let canceled = r.cancel(&ids)?;
            println!("Canceled {} of {}", canceled.len(), ids.len());
        }
        Command::Revalidate { id } => {
            let r = Runner::open(root)?;
            let res = r.revalidate(&id)?;
            if res.is_unschedulable() {
                println!("{id}: no valid site, element failed");
            } else {
                let sites: Vec<&str> = res.valid_sites.iter().map(String::as_str).collect();
                println!("{id}: {}", sites.join(", "));
            }
        }
        Command::Expired { status, interval } => {
            let r = Runner::open(root)?;
            let now = wq_core::now_unix();
            for e in r.expired(status, interval)? {
                println!("- {} [{}] idle {}s", e.id, e.status, now - e.update_time);
            }
        }
        Command::Orphans => {
            let r = Runner::open(root)?;
            println!("Failed {} orphaned files", r.fail_orphans()?);
        }
        Command::QueueWork { spec } => {
            let r = Runner::open(root)?;
            let created = r.queue_work(&spec)?;
            println!("Queued {} elements from {}", created.len(), spec.display());
        }
        Command::Poll { once } => {
            let r = Runner::open(root)?;
            if once {
                let report = r.poll_once();
                println!("{report:?}");
            } else {
                let shutdown = AtomicBool::new(false);
                r.run(&shutdown);
            }
        }
    }

    Ok(())
}
