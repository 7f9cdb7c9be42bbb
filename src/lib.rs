pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    create_task_impl, dashboard_stats_impl, delete_task_impl, focus_impl, list_sessions_impl,
    list_tasks_impl, login_impl, logout_impl, register_impl, spawn_stdin_commands,
    timer_status_impl, timer_stop_impl, update_task_impl, whoami_impl, AppState, TaskInput,
};
use application::scheduler::FocusEvent;
use clap::{Args, Parser, Subcommand};
use infrastructure::error::InfraError;
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pomotask")]
#[command(version, about = "Task tracker with a Pomodoro focus timer", long_about = None)]
pub struct Cli {
    /// Directory holding config/ and state/ (defaults to the current directory)
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Debug logging on stderr (POMOTASK_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the workspace layout and default config
    Init,
    /// Sign in and store the access token
    Login {
        username: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and sign in
    Register {
        email: String,
        username: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored access token
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Manage tasks
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// List remote session records
    Sessions {
        #[arg(long)]
        task_id: Option<i64>,
    },
    /// Dashboard statistics
    Stats,
    /// Inspect or reset the persisted timer
    Timer {
        #[command(subcommand)]
        command: TimerCommands,
    },
    /// Run the timer in the foreground, reading commands from stdin
    Focus {
        #[arg(long)]
        task_id: Option<i64>,
        /// Defaults to the task's title on the server
        #[arg(long, requires = "task_id")]
        title: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum TaskCommands {
    List {
        /// todo, in_progress or done
        #[arg(long)]
        status: Option<String>,
    },
    Add {
        title: String,
        #[command(flatten)]
        fields: TaskFields,
    },
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: TaskFields,
    },
    Delete {
        id: i64,
    },
}

#[derive(Debug, Args)]
pub struct TaskFields {
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    /// low, medium or high
    #[arg(long)]
    pub priority: Option<String>,
    /// YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]
    #[arg(long)]
    pub due: Option<String>,
}

impl TaskFields {
    fn into_input(self, title: Option<String>) -> TaskInput {
        TaskInput {
            title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            due_date: self.due,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum TimerCommands {
    Status,
    /// Flush elapsed time and reset to idle
    Stop,
}

#[derive(Debug, Serialize)]
struct InitResponse {
    workspace_root: String,
    database_path: String,
    api_base_url: String,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let state = AppState::new(workspace_root)?;
    let fail = |command: &str, error: InfraError| anyhow::anyhow!(state.command_error(command, &error));

    match cli.command {
        Commands::Init => print_json(&InitResponse {
            workspace_root: state.workspace_root().display().to_string(),
            database_path: state.database_path().display().to_string(),
            api_base_url: state.config().api_base_url.to_string(),
        }),
        Commands::Login { username, password } => {
            let password = password_or_stdin(password)?;
            let response = login_impl(&state, username, password)
                .await
                .map_err(|error| fail("login", error))?;
            print_json(&response)
        }
        Commands::Register {
            email,
            username,
            password,
        } => {
            let password = password_or_stdin(password)?;
            let user = register_impl(&state, email, username, password)
                .await
                .map_err(|error| fail("register", error))?;
            print_json(&user)
        }
        Commands::Logout => print_json(&logout_impl(&state).map_err(|error| fail("logout", error))?),
        Commands::Whoami => print_json(
            &whoami_impl(&state)
                .await
                .map_err(|error| fail("whoami", error))?,
        ),
        Commands::Tasks { command } => match command {
            TaskCommands::List { status } => print_json(
                &list_tasks_impl(&state, status)
                    .await
                    .map_err(|error| fail("list_tasks", error))?,
            ),
            TaskCommands::Add { title, fields } => print_json(
                &create_task_impl(&state, fields.into_input(Some(title)))
                    .await
                    .map_err(|error| fail("create_task", error))?,
            ),
            TaskCommands::Update { id, title, fields } => print_json(
                &update_task_impl(&state, id, fields.into_input(title))
                    .await
                    .map_err(|error| fail("update_task", error))?,
            ),
            TaskCommands::Delete { id } => print_json(
                &delete_task_impl(&state, id)
                    .await
                    .map_err(|error| fail("delete_task", error))?,
            ),
        },
        Commands::Sessions { task_id } => print_json(
            &list_sessions_impl(&state, task_id)
                .await
                .map_err(|error| fail("list_sessions", error))?,
        ),
        Commands::Stats => print_json(
            &dashboard_stats_impl(&state)
                .await
                .map_err(|error| fail("stats", error))?,
        ),
        Commands::Timer { command } => match command {
            TimerCommands::Status => print_json(
                &timer_status_impl(&state).map_err(|error| fail("timer_status", error))?,
            ),
            TimerCommands::Stop => print_json(
                &timer_stop_impl(&state)
                    .await
                    .map_err(|error| fail("timer_stop", error))?,
            ),
        },
        Commands::Focus { task_id, title } => {
            let commands = spawn_stdin_commands();
            let last = focus_impl(&state, task_id, title, commands, &mut print_focus_event)
                .await
                .map_err(|error| fail("focus", error))?;
            print_json(&last)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn password_or_stdin(password: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_focus_event(event: FocusEvent) {
    match event {
        FocusEvent::Status(snapshot) => {
            let task = match (snapshot.task_id, snapshot.task_title.as_deref()) {
                (Some(id), Some(title)) => format!(" task #{id} {title}"),
                (Some(id), None) => format!(" task #{id}"),
                _ => String::new(),
            };
            let status = if snapshot.is_completed {
                "finished"
            } else if snapshot.is_running {
                "running"
            } else {
                "paused"
            };
            println!(
                "[{}] {} {status}{task}",
                snapshot.session_kind.as_str(),
                snapshot.remaining
            );
        }
        FocusEvent::Completed(completion) => println!(
            "{} finished; {} is ready (`resume` to begin)",
            completion.kind.as_str(),
            completion.next_kind.as_str()
        ),
        FocusEvent::AuthLost(snapshot) => {
            println!("signed out; timer paused at {}", snapshot.remaining)
        }
        FocusEvent::Failed(message) => eprintln!("error: {message}"),
        FocusEvent::Unloaded { snapshot, drained } => {
            println!("saved at {}", snapshot.remaining);
            if !drained {
                eprintln!("some remote updates were not confirmed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn focus_title_requires_task() {
        assert!(Cli::try_parse_from(["pomotask", "focus", "--title", "x"]).is_err());
        let cli = Cli::try_parse_from(["pomotask", "focus", "--task-id", "4"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Focus {
                task_id: Some(4),
                title: None
            }
        ));
    }

    #[test]
    fn task_update_collects_fields() {
        let cli = Cli::try_parse_from([
            "pomotask",
            "--workspace",
            "/tmp/ws",
            "tasks",
            "update",
            "3",
            "--status",
            "done",
            "--priority",
            "low",
        ])
        .expect("parse");
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/ws")));
        let Commands::Tasks {
            command: TaskCommands::Update { id, title, fields },
        } = cli.command
        else {
            panic!("expected tasks update");
        };
        let input = fields.into_input(title);
        assert_eq!(id, 3);
        assert_eq!(input.status.as_deref(), Some("done"));
        assert_eq!(input.priority.as_deref(), Some("low"));
        assert_eq!(input.title, None);
    }
}
