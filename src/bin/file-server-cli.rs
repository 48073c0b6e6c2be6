//! File server CLI client
//!
//! Sends tool calls to the file server over UDP. Plain input lines run as
//! shell commands; lines starting with `:` call the other tools.

use clap::Parser;
use rmp_serde::decode::Deserializer;
use rmp_serde::encode::Serializer;
use rustyline::Editor;
use rustyline::history::FileHistory;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Header size: type (1) + seq (4)
const HEADER_LEN: usize = 5;

/// Message types
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum MsgType {
    Request = 0x01,
    RequestAck = 0x02,
    Response = 0x03,
}

/// Request payload
#[derive(Debug, Serialize)]
struct RequestPayload {
    tool: String,
    arguments: Value,
}

/// Response payload
#[derive(Debug, Deserialize)]
struct ResponsePayload {
    content: String,
    is_error: bool,
}

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "file-server-cli")]
#[command(about = "File server CLI client")]
struct Args {
    /// Server address (e.g., 127.0.0.1:9700)
    #[arg(short, long, default_value = "127.0.0.1:9700")]
    target: SocketAddr,

    /// ACK timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Seconds to wait for a result after the ACK
    #[arg(long, default_value = "180")]
    response_timeout: u64,

    /// Maximum retry attempts
    #[arg(short, long, default_value = "3")]
    max_retries: u32,

    /// History file path
    #[arg(long)]
    history_file: Option<PathBuf>,

    /// Run one command and exit instead of starting the prompt
    #[arg(short = 'c', long = "exec")]
    exec: Option<String>,

    /// Command timeout in seconds passed with every run_command call
    #[arg(long)]
    command_timeout: Option<f64>,
}

/// CLI configuration
#[derive(Debug, Clone)]
struct Config {
    target: SocketAddr,
    ack_timeout_secs: u64,
    response_timeout_secs: u64,
    max_retries: u32,
    history_file: PathBuf,
    command_timeout: Option<f64>,
}

impl Config {
    fn from_args(args: &Args) -> Self {
        let history_file = args.history_file.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|p| p.join(".file_server_history"))
                .unwrap_or_else(|| PathBuf::from(".file_server_history"))
        });

        Self {
            target: args.target,
            ack_timeout_secs: args.timeout,
            response_timeout_secs: args.response_timeout,
            max_retries: args.max_retries,
            history_file,
            command_timeout: args.command_timeout,
        }
    }
}

/// A parsed input line
#[derive(Debug, PartialEq)]
enum Input {
    Call { tool: String, arguments: Value },
    Help,
}

const HELP: &str = "\
<command>              run a shell command
:ls [path]             list a directory
:cat <path>            print a file
:write <path> <text>   write text to a file
:rm <path>             delete a file or empty directory
:tools                 list available tools
:call <tool> [json]    call any tool with raw JSON arguments
:help                  show this help";

/// Turn an input line into a tool call
fn parse_input(line: &str, command_timeout: Option<f64>) -> Result<Input, String> {
    let Some(rest) = line.strip_prefix(':') else {
        let mut arguments = json!({ "command": line });
        if let Some(t) = command_timeout {
            arguments["timeout"] = json!(t);
        }
        return Ok(Input::Call {
            tool: "run_command".to_string(),
            arguments,
        });
    };

    let (verb, args) = match rest.split_once(char::is_whitespace) {
        Some((verb, args)) => (verb, args.trim_start()),
        None => (rest, ""),
    };

    let call = |tool: &str, arguments: Value| -> Result<Input, String> {
        Ok(Input::Call {
            tool: tool.to_string(),
            arguments,
        })
    };
    let require_path = |args: &str| -> Result<String, String> {
        if args.is_empty() {
            Err(format!(":{verb} needs a path"))
        } else {
            Ok(args.to_string())
        }
    };

    match verb {
        "ls" => {
            let path = if args.is_empty() { "." } else { args };
            call("list_files", json!({ "path": path }))
        }
        "cat" => call("read_file", json!({ "file_path": require_path(args)? })),
        "rm" => call("delete_file", json!({ "file_path": require_path(args)? })),
        "write" => {
            let (path, content) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| ":write needs a path and text".to_string())?;
            call(
                "write_file",
                json!({ "file_path": path, "content": content.replace("\\n", "\n") }),
            )
        }
        "tools" => call("list_tools", json!({})),
        "call" => {
            let (tool, raw) = match args.split_once(char::is_whitespace) {
                Some((tool, raw)) => (tool, raw.trim()),
                None => (args, ""),
            };
            if tool.is_empty() {
                return Err(":call needs a tool name".to_string());
            }
            let arguments = if raw.is_empty() {
                json!({})
            } else {
                serde_json::from_str(raw).map_err(|e| format!("invalid JSON arguments: {e}"))?
            };
            call(tool, arguments)
        }
        "help" | "h" => Ok(Input::Help),
        other => Err(format!("unknown command :{other}, try :help")),
    }
}

/// Render a tool result for the terminal
fn render(tool: &str, response: &ResponsePayload) -> String {
    if tool != "run_command" {
        return response.content.clone();
    }

    let Ok(result) = serde_json::from_str::<Value>(&response.content) else {
        return response.content.clone();
    };
    if let Some(error) = result.get("error").and_then(Value::as_str) {
        return error.to_string();
    }

    let mut out = String::new();
    for (stream, prefix) in [("stdout", ""), ("stderr", "[stderr] ")] {
        if let Some(text) = result.get(stream).and_then(Value::as_str) {
            for line in text.lines() {
                out.push_str(prefix);
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    if result.get("timed_out").and_then(Value::as_bool) == Some(true) {
        let secs = result
            .get("timeout_seconds")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        out.push_str(&format!("[timed out after {secs}s]"));
    } else {
        match result.get("exit_code").and_then(Value::as_i64) {
            Some(code) => out.push_str(&format!("[exit {code}]")),
            None => out.push_str("[no exit code]"),
        }
    }
    if result.get("truncated").and_then(Value::as_bool) == Some(true) {
        let max = result.get("max_lines").and_then(Value::as_u64).unwrap_or_default();
        out.push_str(&format!(" [output truncated to {max} lines per stream]"));
    }
    out
}

/// Main client state
struct Client {
    socket: UdpSocket,
    config: Config,
    seq: AtomicU32,
}

impl Client {
    /// Create a new client
    async fn new(config: Config) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok(Self {
            socket,
            config,
            seq: AtomicU32::new(1),
        })
    }

    /// Send a tool call and wait for its result
    async fn call(&self, tool: &str, arguments: Value) -> io::Result<ResponsePayload> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let payload = RequestPayload {
            tool: tool.to_string(),
            arguments,
        };
        let mut packet = vec![MsgType::Request as u8];
        packet.extend_from_slice(&seq.to_be_bytes());
        let mut ser = Serializer::new(&mut packet).with_struct_map();
        payload
            .serialize(&mut ser)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // Retries reuse the seq so the server answers from its dedup cache
        for _attempt in 0..self.config.max_retries {
            self.socket.send_to(&packet, self.config.target).await?;

            match self.wait_for_ack(seq).await {
                Ok(true) => match self.wait_for_response(seq).await {
                    Ok(response) => return Ok(response),
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                        eprintln!("[warning] Response timeout, retrying...");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                Ok(false) => continue,
                Err(_) => continue,
            }
        }

        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "file server not responding",
        ))
    }

    /// Wait for REQUEST_ACK
    async fn wait_for_ack(&self, expected_seq: u32) -> io::Result<bool> {
        let mut buf = [0u8; 1024];

        match timeout(
            Duration::from_secs(self.config.ack_timeout_secs),
            self.socket.recv_from(&mut buf),
        )
        .await
        {
            Ok(Ok((len, addr))) => {
                if addr != self.config.target || len < HEADER_LEN {
                    return Ok(false);
                }

                let msg_type = buf[0];
                let seq = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);

                Ok(msg_type == MsgType::RequestAck as u8 && seq == expected_seq)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false), // Timeout
        }
    }

    /// Wait for RESPONSE, skipping stray ACKs and stale responses
    async fn wait_for_response(&self, expected_seq: u32) -> io::Result<ResponsePayload> {
        let mut buf = vec![0u8; 65536 + HEADER_LEN];
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.response_timeout_secs);

        loop {
            let (len, addr) = match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "Response timeout")),
            };

            if addr != self.config.target || len < HEADER_LEN {
                continue;
            }

            let msg_type = buf[0];
            let seq = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
            if msg_type != MsgType::Response as u8 || seq != expected_seq {
                continue;
            }

            let mut de = Deserializer::new(&buf[HEADER_LEN..len]);
            let payload: ResponsePayload = Deserialize::deserialize(&mut de)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            return Ok(payload);
        }
    }
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args);

    let rt = tokio::runtime::Runtime::new()?;
    match args.exec {
        Some(command) => rt.block_on(run_once(config, command)),
        None => rt.block_on(run_client(config)),
    }
}

/// Run a single command; the process exits non-zero on a tool error
async fn run_once(config: Config, line: String) -> io::Result<()> {
    let client = Client::new(config.clone()).await?;
    let Input::Call { tool, arguments } =
        parse_input(&line, config.command_timeout).map_err(io::Error::other)?
    else {
        println!("{HELP}");
        return Ok(());
    };

    let response = client.call(&tool, arguments).await?;
    println!("{}", render(&tool, &response));
    if response.is_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_client(config: Config) -> io::Result<()> {
    let client = Client::new(config.clone()).await?;

    let mut rl: Editor<(), FileHistory> = Editor::new().map_err(io::Error::other)?;

    if config.history_file.exists()
        && let Err(e) = rl.load_history(&config.history_file)
    {
        eprintln!("[warning] Failed to load history: {}", e);
    }

    println!("file-server-cli v{}", env!("CARGO_PKG_VERSION"));
    println!("Target: {}", client.config.target);
    println!("Type a shell command, or :help. Ctrl+D to quit.");
    println!();

    loop {
        match rl.readline("$ ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(input);

                let (tool, arguments) = match parse_input(input, config.command_timeout) {
                    Ok(Input::Call { tool, arguments }) => (tool, arguments),
                    Ok(Input::Help) => {
                        println!("{HELP}");
                        continue;
                    }
                    Err(e) => {
                        println!("[error] {}", e);
                        continue;
                    }
                };

                print!("[waiting...]");
                io::stdout().flush()?;

                match client.call(&tool, arguments).await {
                    Ok(response) => {
                        print!("\r            \r");
                        let text = render(&tool, &response);
                        if response.is_error {
                            println!("[error] {}", text);
                        } else {
                            println!("{}", text);
                        }
                    }
                    Err(e) => {
                        print!("\r            \r");
                        println!("[error] {}", e);
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("[error] Readline error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&config.history_file) {
        eprintln!("[warning] Failed to save history: {}", e);
    }

    println!("\nGoodbye!");
    Ok(())
}
