use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use rcat_common::config::{
    ConnectionSpec, Exec, Mode, ProxyProtocol, ProxySpec, Source, Transport, DEFAULT_SCAN_CONCURRENCY,
};
use rcat_common::network::endpoint::Family;
use rcat_common::network::range::PortList;
use rcat_common::network::target::{parse_host_port, parse_port, Destination};
use rcat_common::network::tos::parse_tos;

#[derive(Parser, Debug)]
#[command(name = "rcat", version)]
#[command(about = "Arbitrary TCP and UDP connections and listens.")]
#[command(override_usage = "rcat [OPTIONS] [DESTINATION] [PORT]...\n       rcat -l [OPTIONS] [HOST] PORT\n       rcat -l -p PORT [OPTIONS] [HOST]")]
pub struct CommandLine {
    /// Use IPv4 only
    #[arg(short = '4', conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Use IPv6 only
    #[arg(short = '6')]
    pub ipv6: bool,

    /// Allow broadcast
    #[arg(short = 'b')]
    pub broadcast: bool,

    /// Send CRLF as line-ending
    #[arg(short = 'C')]
    pub crlf: bool,

    /// Execute a command through the shell after connecting
    #[arg(short = 'c', long = "sh-exec", value_name = "CMD", conflicts_with = "exec")]
    pub sh_exec: Option<String>,

    /// Detach from stdin
    #[arg(short = 'd')]
    pub detach: bool,

    /// Execute a program after connecting
    #[arg(short = 'e', long = "exec", value_name = "PROG")]
    pub exec: Option<String>,

    /// TCP receive buffer length
    #[arg(short = 'I', value_name = "LENGTH")]
    pub recv_buffer: Option<usize>,

    /// Delay interval for lines sent, ports scanned
    #[arg(short = 'i', value_name = "SECS", value_parser = parse_seconds)]
    pub interval: Option<Duration>,

    /// Keep inbound sockets open for multiple connects
    #[arg(short = 'k', requires = "listen")]
    pub keep_listening: bool,

    /// Listen mode, for inbound connects
    #[arg(short = 'l', conflicts_with = "zero_io")]
    pub listen: bool,

    /// Suppress name/port resolutions
    #[arg(short = 'n')]
    pub numeric: bool,

    /// TCP send buffer length
    #[arg(short = 'O', value_name = "LENGTH")]
    pub send_buffer: Option<usize>,

    /// Username for proxy authentication
    #[arg(short = 'P', value_name = "USER")]
    pub proxy_username: Option<String>,

    /// Password for proxy authentication
    #[arg(long = "proxy-password", value_name = "PASS", requires = "proxy_username")]
    pub proxy_password: Option<String>,

    /// Specify local port for remote connects
    #[arg(short = 'p', value_name = "PORT", value_parser = parse_port)]
    pub source_port: Option<u16>,

    /// Quit after EOF on stdin and delay of seconds
    #[arg(short = 'q', value_name = "SECS", value_parser = parse_seconds)]
    pub quit_after_eof: Option<Duration>,

    /// Randomize remote ports
    #[arg(short = 'r')]
    pub randomize: bool,

    /// Local source address
    #[arg(short = 's', value_name = "SOURCE")]
    pub source_addr: Option<String>,

    /// Set IP Type of Service
    #[arg(short = 'T', value_name = "TOS", value_parser = parse_tos)]
    pub tos: Option<u8>,

    /// UDP mode
    #[arg(short = 'u')]
    pub udp: bool,

    /// Verbose, repeat for more detail
    #[arg(short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Timeout for connects and final net reads
    #[arg(short = 'w', value_name = "SECS", value_parser = parse_seconds)]
    pub timeout: Option<Duration>,

    /// Idle timeout for an established connection, overrides -w there
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub idle_timeout: Option<Duration>,

    /// Per-port timeout in zero-I/O mode
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub scan_timeout: Option<Duration>,

    /// Ports probed at once in zero-I/O mode
    #[arg(long, value_name = "N", default_value_t = DEFAULT_SCAN_CONCURRENCY)]
    pub scan_concurrency: usize,

    /// Proxy protocol: "4", "5" (SOCKS) or "connect" (HTTPS proxy)
    #[arg(short = 'X', value_name = "PROTO", requires = "proxy")]
    pub proxy_protocol: Option<ProxyProtocol>,

    /// Connect through a proxy
    #[arg(short = 'x', value_name = "ADDR[:PORT]")]
    pub proxy: Option<String>,

    /// Zero-I/O mode, report connection status only
    #[arg(short = 'z')]
    pub zero_io: bool,

    /// Destination and port list, or the listen address and port with -l
    #[arg(value_name = "ARGS")]
    pub positionals: Vec<String>,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Turns the flags into an engine spec. Only shape errors are caught
    /// here; cross-field rules are left to `ConnectionSpec::validate`.
    pub fn to_spec(&self) -> anyhow::Result<ConnectionSpec> {
        let mode = if self.listen {
            Mode::Listen
        } else if self.zero_io {
            Mode::Scan
        } else {
            Mode::Connect
        };

        let (destination, source) = match mode {
            Mode::Listen => (self.listen_destination()?, None),
            Mode::Connect | Mode::Scan => (self.remote_destination()?, self.source()),
        };

        let spec = ConnectionSpec {
            mode,
            transport: if self.udp { Transport::Udp } else { Transport::Tcp },
            family: self.family(),
            destination,
            source,
            timeout: self.timeout,
            idle_timeout: self.idle_timeout,
            scan_timeout: self.scan_timeout,
            scan_concurrency: self.scan_concurrency,
            interval: self.interval,
            keep_listening: self.keep_listening,
            tos: self.tos,
            crlf: self.crlf,
            proxy: self.proxy_spec()?,
            numeric: self.numeric,
            detach_stdin: self.detach,
            quit_after_eof: self.quit_after_eof,
            randomize_ports: self.randomize,
            broadcast: self.broadcast,
            recv_buffer: self.recv_buffer,
            send_buffer: self.send_buffer,
            half_close: true,
            exec: self.exec_spec(),
        };

        Ok(spec)
    }

    fn family(&self) -> Family {
        match (self.ipv4, self.ipv6) {
            (true, _) => Family::V4,
            (_, true) => Family::V6,
            _ => Family::Any,
        }
    }

    /// `-l PORT`, `-l HOST PORT`, `-l -p PORT [HOST]`. `-s` names the
    /// address when no host is given.
    fn listen_destination(&self) -> anyhow::Result<Destination> {
        let (host, port): (Option<String>, u16) = match (self.source_port, self.positionals.as_slice()) {
            (Some(port), []) => (self.source_addr.clone(), port),
            (Some(port), [host]) => (Some(host.clone()), port),
            (None, [port]) => (self.source_addr.clone(), parse_port(port).map_err(anyhow::Error::msg)?),
            (None, [host, port]) => (Some(host.clone()), parse_port(port).map_err(anyhow::Error::msg)?),
            (_, []) => bail!("missing port number"),
            _ => bail!("too many arguments for listen mode"),
        };

        Ok(Destination {
            host,
            ports: port.into(),
        })
    }

    fn remote_destination(&self) -> anyhow::Result<Destination> {
        let Some((host, port_args)) = self.positionals.split_first() else {
            bail!("missing destination");
        };
        if port_args.is_empty() {
            bail!("missing port number");
        }

        let mut ports = PortList::new();
        for arg in port_args {
            let parsed: PortList = arg
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid port list {arg:?}"))?;
            for range in parsed.ranges() {
                ports.add_range(*range);
            }
        }

        Ok(Destination::new(host.clone(), ports))
    }

    fn source(&self) -> Option<Source> {
        if self.source_addr.is_none() && self.source_port.is_none() {
            return None;
        }
        Some(Source {
            host: self.source_addr.clone(),
            port: self.source_port,
        })
    }

    fn proxy_spec(&self) -> anyhow::Result<Option<ProxySpec>> {
        let Some(proxy) = self.proxy.as_deref() else {
            return Ok(None);
        };

        let protocol = self.proxy_protocol.unwrap_or(ProxyProtocol::Socks5);
        let (address, port) = parse_host_port(proxy, protocol.default_port())
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid proxy address {proxy:?}"))?;

        let spec = ProxySpec::new(protocol, address, port);
        Ok(Some(match &self.proxy_username {
            Some(user) => spec.with_credentials(user.clone(), self.proxy_password.clone()),
            None => spec,
        }))
    }

    fn exec_spec(&self) -> Option<Exec> {
        match (&self.sh_exec, &self.exec) {
            (Some(cmd), _) => Some(Exec::Shell(cmd.clone())),
            (None, Some(prog)) => Some(Exec::Program(prog.clone())),
            (None, None) => None,
        }
    }
}

/// Whole or fractional seconds, e.g. `5` or `0.25`.
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid number of seconds: {s}"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("seconds out of range: {s}"))
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(args: &[&str]) -> anyhow::Result<ConnectionSpec> {
        let mut argv = vec!["rcat"];
        argv.extend_from_slice(args);
        CommandLine::try_parse_from(argv)?.to_spec()
    }

    #[test]
    fn connect_with_port_list() {
        let spec = spec(&["-v", "example.com", "8080", "20-22,25"]).unwrap();
        assert_eq!(spec.mode, Mode::Connect);
        assert_eq!(spec.destination.host.as_deref(), Some("example.com"));
        let ports: Vec<u16> = spec.destination.ports.iter().collect();
        assert_eq!(ports, vec![20, 21, 22, 25, 8080]);
    }

    #[test]
    fn listen_argument_shapes() {
        let a = spec(&["-l", "8000"]).unwrap();
        assert_eq!(a.destination, Destination::any(8000));

        let b = spec(&["-l", "127.0.0.1", "8000"]).unwrap();
        assert_eq!(b.destination.host.as_deref(), Some("127.0.0.1"));

        let c = spec(&["-lp", "8000", "::1"]).unwrap();
        assert_eq!(c.destination.host.as_deref(), Some("::1"));
        assert_eq!(c.destination.ports.as_single(), Some(8000));
        assert_eq!(c.source, None);

        assert!(spec(&["-l"]).is_err());
    }

    #[test]
    fn zero_io_and_timing_flags() {
        let spec = spec(&["-z", "-w", "1.5", "-i", "0.2", "-u", "host", "53"]).unwrap();
        assert_eq!(spec.mode, Mode::Scan);
        assert_eq!(spec.transport, Transport::Udp);
        assert_eq!(spec.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(spec.probe_concurrency(), 1);
    }

    #[test]
    fn proxy_defaults_port_per_protocol() {
        let socks = spec(&["-x", "10.0.0.1", "host", "22"]).unwrap().proxy.unwrap();
        assert_eq!(socks.protocol, ProxyProtocol::Socks5);
        assert_eq!(socks.port, 1080);

        let http = spec(&["-X", "connect", "-x", "proxy.lan", "-P", "bob", "host", "443"])
            .unwrap()
            .proxy
            .unwrap();
        assert_eq!(http.protocol, ProxyProtocol::Http);
        assert_eq!(http.port, 3128);
        assert_eq!(http.username.as_deref(), Some("bob"));
        assert_eq!(http.password, None);
    }

    #[test]
    fn tos_and_source() {
        let spec = spec(&["-T", "lowdelay", "-s", "192.168.1.2", "-p", "5000", "host", "80"]).unwrap();
        assert_eq!(spec.tos, Some(0x10));
        assert_eq!(
            spec.source,
            Some(Source {
                host: Some("192.168.1.2".to_string()),
                port: Some(5000),
            })
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(spec(&["host"]).is_err());
        assert!(spec(&["host", "0"]).is_err());
        assert!(spec(&["-w", "soon", "host", "80"]).is_err());
        assert!(spec(&["-l", "-z", "80"]).is_err());
    }
}
