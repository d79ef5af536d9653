use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pinpad_core::config;
use pinpad_core::ipc::{self, ClientMsg, DaemonMsg};
use pinpad_core::keypad::Key;
use pinpad_core::view::Feedback;
use std::io::{BufRead, BufReader, Lines, Write};
use std::os::unix::net::UnixStream;

#[derive(Parser)]
#[command(name = "pinctl", about = "Drive and watch the pinpad daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the current phase and feedback
    Status,
    /// Press keypad keys in order (0-9 or "backspace")
    Press {
        #[arg(required = true)]
        keys: Vec<Key>,
    },
    /// Type a digit string, one key per digit
    Type {
        digits: String,
    },
    /// Abandon the current session
    Reset,
    /// Follow the display stream until navigation
    Watch,
}

struct Connection {
    writer: UnixStream,
    lines: Lines<BufReader<UnixStream>>,
}

impl Connection {
    fn open() -> Result<Self> {
        let socket_path = config::socket_path();
        let stream = UnixStream::connect(&socket_path).with_context(|| {
            format!("connecting to pinpad at {}\nIs the daemon running?", socket_path.display())
        })?;
        let writer = stream.try_clone().context("cloning stream")?;
        Ok(Self {
            writer,
            lines: BufReader::new(stream).lines(),
        })
    }

    fn send(&mut self, msg: &ClientMsg) -> Result<()> {
        self.writer
            .write_all(ipc::encode(msg).as_bytes())
            .context("sending command")
    }

    /// Next decodable daemon message, or None once the daemon hangs up.
    fn recv(&mut self) -> Result<Option<DaemonMsg>> {
        for line in self.lines.by_ref() {
            let line = line.context("reading response")?;
            if let Some(msg) = ipc::decode_daemon(&line) {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }

    /// Wait for the reply to a command, skipping display traffic.
    fn reply(&mut self) -> Result<DaemonMsg> {
        loop {
            match self.recv()? {
                Some(msg @ (DaemonMsg::Ack { .. } | DaemonMsg::Status { .. })) => return Ok(msg),
                Some(_) => continue,
                None => anyhow::bail!("daemon closed the connection"),
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut conn = Connection::open()?;

    match cli.command {
        Command::Status => {
            conn.send(&ClientMsg::GetStatus)?;
            if let DaemonMsg::Status {
                phase,
                feedback,
                filled,
                version,
            } = conn.reply()?
            {
                println!("pinpad v{}", version);
                println!("  phase:    {:?}", phase);
                println!("  feedback: {:?}", feedback);
                println!("  filled:   {}", filled);
            }
        }
        Command::Press { keys } => press(&mut conn, &keys)?,
        Command::Type { digits } => {
            let keys = Key::parse_digits(&digits)?;
            press(&mut conn, &keys)?;
        }
        Command::Reset => {
            conn.send(&ClientMsg::Reset)?;
            print_ack(conn.reply()?);
        }
        Command::Watch => watch(&mut conn)?,
    }

    Ok(())
}

fn press(conn: &mut Connection, keys: &[Key]) -> Result<()> {
    for key in keys {
        conn.send(&ClientMsg::Press { key: *key })?;
        print_ack(conn.reply()?);
    }
    Ok(())
}

fn print_ack(msg: DaemonMsg) {
    if let DaemonMsg::Ack { ok, message } = msg {
        if ok {
            println!("{}", message);
        } else {
            eprintln!("{}", message);
        }
    }
}

fn watch(conn: &mut Connection) -> Result<()> {
    conn.send(&ClientMsg::RegisterDisplay)?;
    while let Some(msg) = conn.recv()? {
        match msg {
            DaemonMsg::View(view) => {
                let mark = match view.feedback {
                    Feedback::Idle => "",
                    Feedback::Error => "  mismatch",
                    Feedback::Success => "  ok",
                };
                let prompt = view.prompt.as_deref().unwrap_or("");
                println!("{:<16} {}{}", prompt, view.dots(), mark);
            }
            DaemonMsg::Navigate { target } => {
                println!("-> {}", target);
                break;
            }
            DaemonMsg::Ack { ok: false, message } => eprintln!("error: {}", message),
            _ => {}
        }
    }
    Ok(())
}
