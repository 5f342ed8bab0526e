//! Port to service name, from the system services database.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::config::Transport;

const SERVICES_PATH: &str = "/etc/services";

type ServiceTable = HashMap<(u16, Transport), String>;

static SERVICES: OnceLock<ServiceTable> = OnceLock::new();

/// What goes after the slash in `[tcp/http]`. `*` when unknown or when
/// lookups are turned off.
pub fn service_label(port: u16, transport: Transport, numeric: bool) -> &'static str {
    if numeric {
        return "*";
    }
    label_in(SERVICES.get_or_init(|| load(SERVICES_PATH)), port, transport)
}

fn label_in(table: &ServiceTable, port: u16, transport: Transport) -> &str {
    table.get(&(port, transport)).map_or("*", String::as_str)
}

fn load(path: &str) -> ServiceTable {
    std::fs::read_to_string(path)
        .map(|text| parse(&text))
        .unwrap_or_default()
}

/// `name port/proto [aliases...] [# comment]`. The first name listed for a
/// port wins.
fn parse(text: &str) -> ServiceTable {
    let mut table = ServiceTable::new();

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(name), Some(entry)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = entry.split_once('/') else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        let transport = match proto {
            "tcp" => Transport::Tcp,
            "udp" => Transport::Udp,
            _ => continue,
        };

        table.entry((port, transport)).or_insert_with(|| name.to_string());
    }

    table
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
