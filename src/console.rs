//! Line-oriented business and interface satellites used by the binary.
//!
//! The interface reads stdin and prints `SHOW_CONTENT`. The business
//! satellite turns typed lines into network envelopes and network reports
//! into text.
//!
//! # Line commands
//!
//! | line                   | envelope                                  |
//! |------------------------|-------------------------------------------|
//! | `text`                 | `SEND {msg=text}`                         |
//! | `/to uid0,uid1 text`   | `SEND {msg=text, clients=[uid0,uid1]}`    |
//! | `/ping [uid0,uid1]`    | `CHECK_CONN {clients}`                    |
//! | `/info`                | `GET_NET_INFO`                            |
//! | `/app`                 | `GET_APP_INFO`                            |
//! | `/connect`             | `CONNECT`                                 |
//! | `/disconnect`          | `DISCONNECT`                              |
//! | `/shutdown`            | `NET_SHUTDOWN`                            |
//! | `/accept on\|off`      | `SET_BUS_INFO {accept_connections}`       |
//! | `/quit`                | `CLOSE_APP`                               |

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use crate::bus::{BusResult, Channel, Envelope, Kind, Satellite, SatelliteContext, THREADS_STARTED};

const HELP: &str = "commands: /to <uids> <text>, /ping [uids], /info, /app, /connect, \
                    /disconnect, /shutdown, /accept on|off, /quit";

/// Which endpoint the console drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Drives a server container.
    Server,
    /// Drives a client endpoint.
    Client,
}

impl Role {
    /// Lowercase role name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

/// Outcome of parsing one typed line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineAction {
    /// Post this envelope.
    Emit(Envelope),
    /// Show this text back to the user.
    Show(String),
    /// Nothing to do.
    Ignore,
}

/// Map a typed line to what the business satellite should do.
pub fn parse_line(role: Role, line: &str) -> LineAction {
    let line = line.trim();
    if line.is_empty() {
        return LineAction::Ignore;
    }
    let Some(command) = line.strip_prefix('/') else {
        return LineAction::Emit(Envelope::new(Kind::Send).with("msg", line).with("confirm", true));
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let env = match name {
        "quit" | "exit" => Envelope::new(Kind::CloseApp),
        "info" => Envelope::new(Kind::GetNetInfo),
        "app" => Envelope::new(Kind::GetAppInfo),
        "connect" => Envelope::new(Kind::Connect),
        "disconnect" => Envelope::new(Kind::Disconnect),
        "shutdown" => Envelope::new(Kind::NetShutdown),
        "ping" if rest.is_empty() => Envelope::new(Kind::CheckConn),
        "ping" => Envelope::new(Kind::CheckConn).with("clients", rest),
        "to" if role == Role::Server => {
            let Some((uids, text)) = rest.split_once(char::is_whitespace) else {
                return LineAction::Show("usage: /to <uid0,uid1> <text>".to_string());
            };
            Envelope::new(Kind::Send)
                .with("msg", text.trim())
                .with("clients", uids)
                .with("confirm", true)
        }
        "accept" if role == Role::Server => match rest {
            "on" => Envelope::new(Kind::SetBusInfo)
                .to(Channel::Network)
                .with("accept_connections", true),
            "off" => Envelope::new(Kind::SetBusInfo)
                .to(Channel::Network)
                .with("accept_connections", false),
            _ => return LineAction::Show("usage: /accept on|off".to_string()),
        },
        "help" => return LineAction::Show(HELP.to_string()),
        other => return LineAction::Show(format!("unknown command /{other}; {HELP}")),
    };
    LineAction::Emit(env)
}

/// Text shown for a network report, if any.
pub fn describe_report(envelope: &Envelope) -> Option<String> {
    let peer = envelope.str_arg("peer").unwrap_or("self");
    let status = envelope.str_arg("status").unwrap_or("?");
    let message = envelope.str_arg("message").unwrap_or("");
    match envelope.kind {
        Kind::Receive => {
            let uid = envelope.str_arg("uid").unwrap_or("?");
            let msg = envelope.str_arg("msg").unwrap_or("");
            match envelope.str_arg("netcode") {
                Some(code) if msg.is_empty() => Some(format!("[{uid}] <{code}>")),
                _ => Some(format!("[{uid}] {msg}")),
            }
        }
        Kind::NetStatus => Some(format!("status {peer}: {status} ({message})")),
        Kind::NetError => Some(format!("error {peer}: {status} ({message})")),
        Kind::SendError => {
            let msg = envelope.str_arg("msg").unwrap_or("");
            match envelope.str_list_arg("clients") {
                Some(clients) if !clients.is_empty() => {
                    Some(format!("could not deliver {msg:?} to {}", clients.join(",")))
                }
                _ => Some(format!("could not deliver {msg:?}")),
            }
        }
        _ => None,
    }
}

fn show(text: impl Into<String>) -> Envelope {
    Envelope::new(Kind::ShowContent).with("text", text.into())
}

// ============================================================================
// Business
// ============================================================================

/// Business satellite bridging typed lines and the network channel.
#[derive(Debug)]
pub struct ConsoleBusiness {
    role: Role,
}

impl ConsoleBusiness {
    /// Business logic for `role`.
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

#[async_trait]
impl Satellite for ConsoleBusiness {
    fn channel(&self) -> Channel {
        Channel::Business
    }

    async fn handle(&mut self, envelope: Envelope, ctx: &SatelliteContext) -> BusResult<()> {
        match envelope.kind {
            Kind::SendUserCommand => {
                let line = envelope.str_arg("line").unwrap_or_default();
                match parse_line(self.role, line) {
                    LineAction::Emit(env) => ctx.emit(env).await?,
                    LineAction::Show(text) => ctx.emit(show(text)).await?,
                    LineAction::Ignore => {}
                }
            }
            Kind::Receive | Kind::NetStatus | Kind::NetError | Kind::SendError => {
                if let Some(text) = describe_report(&envelope) {
                    ctx.emit(show(text)).await?;
                }
            }
            Kind::SetNetInfo => {
                log::debug!("[Console] net info: {}", envelope.arg("info").unwrap_or(&Value::Null));
            }
            Kind::GuiReady => {
                ctx.emit(show(format!("blocknet {} ready; {HELP}", self.role.as_str())))
                    .await?;
            }
            Kind::SetAppInfo | Kind::SetSatInfo => {
                ctx.emit(show(format!("{}: {}", envelope.kind, Value::Object(envelope.args))))
                    .await?;
            }
            Kind::GetBusInfo => {
                let mut reply = Envelope::new(Kind::SetBusInfo).with("role", self.role.as_str());
                reply.target = envelope.source;
                ctx.emit(reply).await?;
            }
            Kind::ReturnUserChoice => {
                log::info!("[Console] choice: {}", envelope.str_arg("choice").unwrap_or(""));
            }
            other => log::debug!("[Console] ignored {other}"),
        }
        Ok(())
    }
}

// ============================================================================
// Interface
// ============================================================================

/// Interface satellite: stdin lines in, text out.
pub struct ConsoleInterface {
    output: Box<dyn Write + Send>,
    read_stdin: bool,
    awaiting_choice: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ConsoleInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleInterface")
            .field("read_stdin", &self.read_stdin)
            .finish_non_exhaustive()
    }
}

impl ConsoleInterface {
    /// Interface reading stdin and writing stdout.
    pub fn stdio() -> Self {
        Self::with_output(Box::new(std::io::stdout()), true)
    }

    /// Interface writing to `output`; stdin is read only if `read_stdin`.
    pub fn with_output(output: Box<dyn Write + Send>, read_stdin: bool) -> Self {
        Self {
            output,
            read_stdin,
            awaiting_choice: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    fn print(&mut self, text: &str) {
        if let Err(e) = writeln!(self.output, "{text}").and_then(|()| self.output.flush()) {
            log::warn!("[Console] write failed: {e}");
        }
    }
}

#[async_trait]
impl Satellite for ConsoleInterface {
    fn channel(&self) -> Channel {
        Channel::Interface
    }

    async fn on_start(&mut self, ctx: &SatelliteContext) -> BusResult<()> {
        if !self.read_stdin {
            return Ok(());
        }
        let ctx = ctx.clone();
        let awaiting_choice = self.awaiting_choice.clone();
        self.reader = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        log::debug!("[Console] stdin closed");
                        break;
                    }
                    Err(e) => {
                        log::warn!("[Console] stdin read failed: {e}");
                        break;
                    }
                };
                let env = if awaiting_choice.swap(false, Ordering::SeqCst) {
                    Envelope::new(Kind::ReturnUserChoice).with("choice", line)
                } else {
                    Envelope::new(Kind::SendUserCommand).with("line", line)
                };
                if ctx.emit(env).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn on_threads_started(&mut self, ctx: &SatelliteContext) -> BusResult<()> {
        ctx.emit(Envelope::new(Kind::GuiReady)).await
    }

    async fn handle(&mut self, envelope: Envelope, ctx: &SatelliteContext) -> BusResult<()> {
        match envelope.kind {
            Kind::ShowContent => {
                let text = envelope.str_arg("text").unwrap_or_default();
                self.print(text);
            }
            Kind::AskUserChoice => {
                let prompt = envelope.str_arg("prompt").unwrap_or("choose:");
                let choices = envelope.str_list_arg("choices").unwrap_or_default();
                self.print(&format!("{prompt} [{}]", choices.join("/")));
                self.awaiting_choice.store(true, Ordering::SeqCst);
            }
            Kind::GetGuiInfo => {
                let mut reply = Envelope::new(Kind::SetGuiInfo).with("kind", "console");
                reply.target = envelope.source;
                ctx.emit(reply).await?;
            }
            Kind::SetBusInfo => {
                log::debug!("[Console] bus info: {:?}", envelope.args);
            }
            Kind::SetAppInfo if envelope.arg(THREADS_STARTED).is_none() => {
                log::debug!("[Console] app info: {:?}", envelope.args);
            }
            other => log::debug!("[Console] ignored {other}"),
        }
        Ok(())
    }

    async fn on_shutdown(&mut self, _ctx: &SatelliteContext) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(action: LineAction) -> Envelope {
        match action {
            LineAction::Emit(env) => env,
            other => panic!("expected an envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_line_is_confirmed_send() {
        let env = emitted(parse_line(Role::Client, "  hello world "));
        assert_eq!(env.kind, Kind::Send);
        assert_eq!(env.str_arg("msg"), Some("hello world"));
        assert_eq!(env.bool_arg("confirm"), Some(true));
    }

    #[test]
    fn test_server_targeted_send() {
        let env = emitted(parse_line(Role::Server, "/to uid0,uid3 hi there"));
        assert_eq!(env.kind, Kind::Send);
        assert_eq!(env.str_arg("msg"), Some("hi there"));
        assert_eq!(
            env.str_list_arg("clients"),
            Some(vec!["uid0".to_string(), "uid3".to_string()])
        );
        assert!(matches!(parse_line(Role::Client, "/to uid0 hi"), LineAction::Show(_)));
    }

    #[test]
    fn test_control_commands() {
        assert_eq!(emitted(parse_line(Role::Client, "/quit")).kind, Kind::CloseApp);
        assert_eq!(emitted(parse_line(Role::Client, "/info")).kind, Kind::GetNetInfo);
        assert_eq!(emitted(parse_line(Role::Server, "/shutdown")).kind, Kind::NetShutdown);

        let ping = emitted(parse_line(Role::Server, "/ping uid0,uid3"));
        assert_eq!(ping.kind, Kind::CheckConn);
        assert_eq!(ping.str_list_arg("clients").map(|c| c.len()), Some(2));
        assert!(emitted(parse_line(Role::Client, "/ping")).arg("clients").is_none());

        let accept = emitted(parse_line(Role::Server, "/accept off"));
        assert_eq!(accept.target, Some(Channel::Network));
        assert_eq!(accept.bool_arg("accept_connections"), Some(false));
    }

    #[test]
    fn test_blank_and_unknown_lines() {
        assert_eq!(parse_line(Role::Client, "   "), LineAction::Ignore);
        assert!(matches!(parse_line(Role::Client, "/bogus"), LineAction::Show(_)));
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_interface_prints_and_answers_gui_info() {
        let buf = SharedBuf::default();
        let mut console = ConsoleInterface::with_output(Box::new(buf.clone()), false);
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(8);
        let (in_tx, _in_rx) = tokio::sync::mpsc::channel(8);
        let ctx = SatelliteContext::new(Channel::Interface, out_tx, in_tx);

        console.handle(show("hello there"), &ctx).await.unwrap();
        let mut ask = Envelope::new(Kind::AskUserChoice)
            .with("prompt", "keep?")
            .with("choices", "yes,no");
        ask.source = Some(Channel::Business);
        console.handle(ask, &ctx).await.unwrap();
        assert!(console.awaiting_choice.load(Ordering::SeqCst));

        let printed = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(printed, "hello there\nkeep? [yes/no]\n");

        let mut ask_info = Envelope::new(Kind::GetGuiInfo);
        ask_info.source = Some(Channel::Business);
        console.handle(ask_info, &ctx).await.unwrap();
        let reply = out_rx.recv().await.unwrap();
        assert_eq!(reply.kind, Kind::SetGuiInfo);
        assert_eq!(reply.target, Some(Channel::Business));
        assert_eq!(reply.source, Some(Channel::Interface));
    }

    #[test]
    fn test_describe_reports() {
        let env = Envelope::new(Kind::Receive)
            .with("uid", "uid0")
            .with("msg", "hello");
        assert_eq!(describe_report(&env).as_deref(), Some("[uid0] hello"));

        let env = Envelope::new(Kind::Receive)
            .with("uid", "uid0")
            .with("netcode", "CLIENT_CONNECTED")
            .with("msg", "");
        assert_eq!(describe_report(&env).as_deref(), Some("[uid0] <CLIENT_CONNECTED>"));

        let env = Envelope::new(Kind::SendError)
            .with("msg", "hi")
            .with("clients", vec!["uid1".to_string()]);
        assert_eq!(
            describe_report(&env).as_deref(),
            Some("could not deliver \"hi\" to uid1")
        );
        assert_eq!(describe_report(&Envelope::new(Kind::SetNetInfo)), None);
    }
}
