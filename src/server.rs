// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Line-based TCP control server.
//!
//! One line per command: `SPEED <kmh>`, `STOP`, `RECONNECT`, `STATUS`,
//! `HISTORY [n]`, `QUIT`.  Responses are `OK ...` or `ERR ...` lines.
//! Handlers parse and forward to the controller over channels; one
//! dispatcher serializes the requests.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::*;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Result, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

/// Default number of rows a bare `HISTORY` returns.
const HISTORY_DEFAULT: usize = 20;

#[derive(Debug, PartialEq)]
pub(crate) enum Command {
    Apply(f64),
    Stop,
    Reconnect,
    Status,
    History(usize),
}

#[derive(Debug)]
pub(crate) struct Request {
    pub hid: usize,
    pub cmd: Command,
}

#[derive(Debug)]
pub(crate) struct Response {
    pub hid: usize,
    pub lines: Vec<String>,
}

enum HandlerEvent {
    Request(Request),
    New((usize, Sender<Response>)),
    Finished(usize),
}

struct Handler {
    hid: usize,
    client: TcpStream,
    requests: Sender<HandlerEvent>,
}

pub struct Server {
    to_ctl: Sender<Request>,
    from_ctl: Receiver<Response>,
}

fn parse_command(line: &str) -> std::result::Result<Command, String> {
    let mut words = line.split_whitespace();
    let verb = match words.next() {
        Some(verb) => verb.to_ascii_uppercase(),
        None => return Err("empty command".into()),
    };
    let cmd = match verb.as_str() {
        "SPEED" => {
            let arg = words.next().ok_or("usage: SPEED <kmh>")?;
            let kmh = arg
                .parse()
                .map_err(|_| format!("not a number: {:?}", arg))?;
            Command::Apply(kmh)
        }
        "STOP" => Command::Stop,
        "RECONNECT" => Command::Reconnect,
        "STATUS" => Command::Status,
        "HISTORY" => {
            let count = match words.next() {
                Some(arg) => arg
                    .parse()
                    .map_err(|_| format!("not a count: {:?}", arg))?,
                None => HISTORY_DEFAULT,
            };
            Command::History(count)
        }
        _ => return Err(format!("unknown command {:?}", verb)),
    };
    if words.next().is_some() {
        return Err("trailing arguments".into());
    }
    Ok(cmd)
}

impl Handler {
    fn new(
        client: TcpStream,
        hid: usize,
        requests: Sender<HandlerEvent>,
        replies: Receiver<Response>,
    ) -> Self {
        let send_client = client.try_clone().expect("could not clone socket");
        thread::spawn(move || Handler::sender(send_client, replies));
        Handler {
            hid,
            client,
            requests,
        }
    }

    fn sender(mut client: TcpStream, replies: Receiver<Response>) {
        if let Ok(peer) = client.peer_addr() {
            mlzlog::set_thread_prefix(format!("{} sender: ", peer));
        }
        for response in replies {
            debug!("sending response: {:?}", response);
            for line in &response.lines {
                if let Err(err) = writeln!(client, "{}", line) {
                    warn!("write error: {}", err);
                    return;
                }
            }
        }
    }

    fn handle(mut self) {
        if let Ok(peer) = self.client.peer_addr() {
            mlzlog::set_thread_prefix(format!("{}: ", peer));
        }
        info!("connection accepted");

        let reader = match self.client.try_clone() {
            Ok(stream) => BufReader::new(stream),
            Err(err) => {
                warn!("could not clone socket: {}", err);
                return;
            }
        };
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("error reading request: {}", err);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("QUIT") {
                break;
            }
            match parse_command(line) {
                Ok(cmd) => {
                    debug!("got request: {:?}", cmd);
                    let _ = self.requests.send(HandlerEvent::Request(Request {
                        hid: self.hid,
                        cmd,
                    }));
                }
                Err(msg) => {
                    if let Err(err) = writeln!(self.client, "ERR {}", msg) {
                        warn!("error writing error response: {}", err);
                        break;
                    }
                }
            }
        }
        info!("connection closed");
        let _ = self.requests.send(HandlerEvent::Finished(self.hid));
    }
}

impl Server {
    pub(crate) fn new() -> (Self, Receiver<Request>, Sender<Response>) {
        let (w_to_ctl, r_to_ctl) = unbounded();
        let (w_from_ctl, r_from_ctl) = unbounded();
        (
            Server {
                to_ctl: w_to_ctl,
                from_ctl: r_from_ctl,
            },
            r_to_ctl,
            w_from_ctl,
        )
    }

    /// Listen for connections on the TCP socket and spawn handlers for it.
    fn tcp_listener(tcp_sock: TcpListener, handler_sender: Sender<HandlerEvent>) {
        mlzlog::set_thread_prefix(String::from("control: "));

        if let Ok(addr) = tcp_sock.local_addr() {
            info!("listening on {}", addr);
        }
        let mut handler_id = 0;

        while let Ok((stream, _)) = tcp_sock.accept() {
            let (w_rep, r_rep) = unbounded();
            let w_req = handler_sender.clone();
            handler_id += 1;
            let _ = w_req.send(HandlerEvent::New((handler_id, w_rep)));
            thread::spawn(move || Handler::new(stream, handler_id, w_req, r_rep).handle());
        }
    }

    fn dispatcher(self, r_clients: Receiver<HandlerEvent>) {
        mlzlog::set_thread_prefix(String::from("dispatcher: "));

        let mut handlers = BTreeMap::new();

        for event in r_clients {
            match event {
                HandlerEvent::New((id, chan)) => {
                    handlers.insert(id, chan);
                }
                HandlerEvent::Finished(id) => {
                    handlers.remove(&id);
                }
                HandlerEvent::Request(req) => {
                    let hid = req.hid;
                    if self.to_ctl.send(req).is_err() {
                        break;
                    }
                    let resp = match self.from_ctl.recv() {
                        Ok(resp) => resp,
                        Err(_) => break,
                    };
                    if let Some(chan) = handlers.get(&hid) {
                        let _ = chan.send(resp);
                    }
                }
            }
        }
    }

    pub fn start(self, addr: &str) -> Result<()> {
        let (w_clients, r_clients) = unbounded();
        let tcp_sock = TcpListener::bind(addr)?;

        thread::spawn(move || Server::tcp_listener(tcp_sock, w_clients));
        thread::spawn(move || Server::dispatcher(self, r_clients));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_commands() {
        assert_eq!(parse_command("SPEED 5.5"), Ok(Command::Apply(5.5)));
        assert_eq!(parse_command("speed 0"), Ok(Command::Apply(0.0)));
        assert_eq!(parse_command("STOP"), Ok(Command::Stop));
        assert_eq!(parse_command("reconnect"), Ok(Command::Reconnect));
        assert_eq!(parse_command("STATUS"), Ok(Command::Status));
        assert_eq!(parse_command("HISTORY"), Ok(Command::History(20)));
        assert_eq!(parse_command("HISTORY 5"), Ok(Command::History(5)));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("SPEED").is_err());
        assert!(parse_command("SPEED fast").is_err());
        assert!(parse_command("SPEED 5 5").is_err());
        assert!(parse_command("HISTORY many").is_err());
        assert!(parse_command("FROBNICATE").is_err());
    }
}
