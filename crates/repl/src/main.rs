use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::{io::Write, path::PathBuf};

use clap::Parser;
use color_eyre::eyre::{self, Context};
use crossbeam_channel::Receiver;
use debugger::utils::normalise_path;
use debugger::{DebugSession, Event, LldbBackend, LldbBackendOptions, NodeId, SessionOptions};
use tracing_subscriber::filter::EnvFilter;

struct App {
    session: DebugSession,
    session_events: Receiver<Event>,
    input_rx: Receiver<String>,

    #[allow(dead_code)]
    input_thread: JoinHandle<()>,
}

impl App {
    fn new(session: DebugSession) -> Self {
        let session_events = session.events();

        // handle input
        let (input_tx, input_rx) = crossbeam_channel::unbounded();
        let input_thread = std::thread::spawn(move || {
            let mut buffer = String::new();
            loop {
                match std::io::stdin().read_line(&mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {
                        let input = buffer.trim().to_owned();
                        if input_tx.send(input).is_err() {
                            break;
                        }
                        buffer.clear();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reading from stdin");
                        break;
                    }
                }
            }
        });

        Self {
            session,
            session_events,
            input_thread,
            input_rx,
        }
    }

    fn loop_step(&mut self) -> eyre::Result<ShouldQuit> {
        print!("> ");
        std::io::stdout().flush()?;

        crossbeam_channel::select! {
            recv(self.input_rx) -> input => match input {
                Ok(input) => self.handle_input(&input).context("handling command"),
                // stdin closed
                Err(_) => Ok(ShouldQuit::True),
            },
            recv(self.session_events) -> event => if let Ok(event) = event {
                self.handle_session_event(event).context("handling session event")
            } else {
                Ok(ShouldQuit::False)
            },
        }
    }

    #[tracing::instrument(skip(self))]
    fn handle_session_event(&mut self, event: Event) -> eyre::Result<ShouldQuit> {
        match event {
            Event::Continue => report(self.session.r#continue()),
            Event::StepOver => report(self.session.step_over()),
            Event::StepInto => report(self.session.step_into()),
            Event::LoadFile(node) => {
                report(self.session.open_file(node));
            }
            Event::Io(text) => {
                print!("{text}");
            }
            Event::SwitchToFile(path) => {
                report(self.session.request_switch(&path).map(|_| ()));
            }
        }

        if let Some(node) = self.session.take_switch()? {
            self.show_file(node)?;
        }
        Ok(ShouldQuit::False)
    }

    /// Print the active line of a file brought to the front
    fn show_file(&self, node: NodeId) -> eyre::Result<()> {
        let Some(location) = self.session.active_location() else {
            let path = self.session.with_tree(|tree| tree.path(node))?;
            println!("showing {}", path.display());
            return Ok(());
        };
        let text = self.session.with_tree(|tree| {
            tree.node(node)
                .and_then(|node| node.lines())
                .and_then(|lines| lines.get((location.line as usize).checked_sub(1)?))
                .map(|line| line.text.clone())
        })?;
        println!("stopped at {location}");
        if let Some(text) = text {
            println!("{:>5} {text}", location.line);
        }
        Ok(())
    }

    fn handle_input(&mut self, input: &str) -> eyre::Result<ShouldQuit> {
        match input {
            "q" => return Ok(ShouldQuit::True),
            "w" => match self.session.active_location() {
                Some(location) => println!("{location}"),
                None => println!("{:?}", self.session.state()),
            },
            "tree" => {
                let rendered = self.session.with_tree(|tree| tree.render())?;
                print!("{rendered}");
            }
            "io" => print!("{}", self.session.console()),
            "bl" => {
                for record in self.session.breakpoints() {
                    println!("{}: {}", record.id, record.location);
                }
            }
            "continue" => self.session.publish(Event::Continue),
            "step" => self.session.publish(Event::StepInto),
            "next" => self.session.publish(Event::StepOver),
            other => {
                tracing::debug!(command = other, "executing command");
                report(self.session.exec_command(other));
            }
        }
        Ok(ShouldQuit::False)
    }
}

fn report(result: Result<(), debugger::SessionError>) {
    if let Err(e) = result {
        tracing::debug!(error = %e, "command failed");
        println!("error: {e}");
    }
}

#[derive(Debug, Parser)]
struct Args {
    /// Program to debug
    #[clap(short, long)]
    executable: PathBuf,

    /// File of commands to run once the target is loaded, one per line
    #[clap(short, long)]
    autoexec: Option<PathBuf>,

    /// Configuration file, defaults to the user config directory
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(long, default_value = "lldb-frontend.log")]
    log: PathBuf,

    /// Arguments passed to the program
    #[clap(last = true)]
    args: Vec<String>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install().context("installing color_eyre")?;
    let args = Args::parse();

    let log_file = std::fs::File::create(&args.log)
        .with_context(|| format!("creating log file {}", args.log.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(Mutex::new(log_file))
        .init();

    let config = config::load_from(args.config.as_deref()).context("loading configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let backend = LldbBackend::new(LldbBackendOptions {
        adapter: normalise_path(&config.adapter).into_owned(),
        ..LldbBackendOptions::default()
    })
    .context("creating debugger backend")?;

    let session = DebugSession::new(
        Arc::new(backend),
        SessionOptions {
            args: args.args,
            working_directory: config
                .working_directory
                .as_deref()
                .map(|dir| normalise_path(dir).into_owned()),
            stop_on_entry: config.stop_on_entry,
            poll_interval: config.poll_interval(),
            drain_chunk_bytes: config.drain_chunk_bytes,
        },
    );
    session
        .set_target(&args.executable)
        .context("loading target")?;
    for missing in session.missing_files() {
        println!("source not found: {}", missing.display());
    }

    if let Some(autoexec) = args.autoexec {
        let script = std::fs::read_to_string(normalise_path(&autoexec))
            .with_context(|| format!("reading {}", autoexec.display()))?;
        for line in script.lines() {
            tracing::debug!(command = line, "running autoexec command");
            report(session.exec_command(line));
        }
    }

    let mut app = App::new(session);
    tracing::debug!("session set up");
    loop {
        match app.loop_step() {
            Ok(ShouldQuit::True) => break,
            Ok(ShouldQuit::False) => {}
            Err(e) => eyre::bail!("Error running command: {e}"),
        }
    }

    Ok(())
}

enum ShouldQuit {
    True,
    False,
}
