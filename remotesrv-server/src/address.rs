//! Resolution of listen addresses.
//!
//! Listen addresses are given as `host:port` strings which may embed template actions that are
//! expanded against the live network interfaces of the host:
//!
//! ```text
//! {{ GetInterfaceIP "eth0" }}:50051
//! [{{ GetInterfaceIPv6 "eth0" }}]:80
//! {{ GetPrivateIP }}:8080
//! {{ GetPublicIP }}:443
//! ```
//!
//! Use [`resolve`] to turn such a specification into a [`ResolvedAddress`].
//!
//! The port may be numeric, a TCP service name such as `http`, or empty for an ephemeral port.
//! It is only turned into a number when binding, see [`ResolvedAddress::port_number`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use thiserror::Error;

const ACTION_START: &str = "{{";
const ACTION_END: &str = "}}";

/// Service database consulted for named ports.
const SERVICES_FILE: &str = "/etc/services";

/// TCP services known without a service database.
const WELL_KNOWN_SERVICES: &[(&str, u16)] = &[
    ("ftp", 21),
    ("ftps", 990),
    ("gopher", 70),
    ("http", 80),
    ("https", 443),
    ("imap2", 143),
    ("imap3", 220),
    ("imaps", 993),
    ("pop3", 110),
    ("pop3s", 995),
    ("smtp", 25),
    ("submissions", 465),
    ("ssh", 22),
    ("telnet", 23),
];

/// Errors resolving a listen address.
#[derive(Debug, Error, PartialEq)]
pub enum AddressError {
    /// The template actions in the address could not be expanded.
    #[error("invalid address template `{spec}`: {reason}")]
    Template {
        /// The original address specification.
        spec: String,
        /// What went wrong during expansion.
        reason: String,
    },

    /// The expanded address is not of the form `host:port`.
    #[error("invalid address `{addr}`: {reason}")]
    Format {
        /// The expanded address.
        addr: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The expanded address has no host.
    #[error("host can't be empty in `{addr}`; use e.g. 0.0.0.0 to listen on all addresses")]
    EmptyHost {
        /// The expanded address.
        addr: String,
    },
}

/// A validated `host:port` listen address with a non-empty host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAddress {
    addr: String,
    host: String,
    port: String,
}

impl ResolvedAddress {
    /// The full address as it was resolved.
    pub fn as_str(&self) -> &str {
        &self.addr
    }

    /// The host component, without brackets for IPv6 addresses.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port component as written, possibly a service name or empty.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// The numeric port to bind.
    ///
    /// An empty port means any free port. Service names are looked up in `/etc/services`, falling
    /// back to a small table of well-known services. Returns `None` for unknown names and numbers
    /// out of range.
    pub fn port_number(&self) -> Option<u16> {
        if self.port.is_empty() {
            return Some(0);
        }
        if self.port.bytes().all(|b| b.is_ascii_digit()) {
            return self.port.parse().ok();
        }

        let services = std::fs::read_to_string(SERVICES_FILE).unwrap_or_default();
        lookup_service(&services, &self.port)
    }
}

/// Finds the TCP port of a named service in `services`, in `/etc/services` format.
fn lookup_service(services: &str, name: &str) -> Option<u16> {
    let from_database = services.lines().find_map(|line| {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let service = fields.next()?;
        let (port, protocol) = fields.next()?.split_once('/')?;
        let aliases = fields;

        let matches = service == name || aliases.clone().any(|alias| alias == name);
        if protocol == "tcp" && matches {
            port.parse().ok()
        } else {
            None
        }
    });

    from_database.or_else(|| {
        WELL_KNOWN_SERVICES
            .iter()
            .find(|(service, _)| *service == name)
            .map(|(_, port)| *port)
    })
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

/// An address assigned to a network interface.
#[derive(Clone, Debug)]
pub struct InterfaceAddr {
    /// Name of the interface, e.g. `eth0`.
    pub name: String,
    /// The assigned address.
    pub ip: IpAddr,
    /// Whether the interface is up.
    pub up: bool,
    /// Whether the interface is a loopback interface.
    pub loopback: bool,
}

/// Resolves an address specification against the host's network interfaces.
///
/// Template actions are expanded first. The result must be a `host:port` pair with a non-empty
/// host. Literal addresses are returned unchanged.
pub fn resolve(spec: &str) -> Result<ResolvedAddress, AddressError> {
    resolve_with(spec, system_interfaces)
}

/// Like [`resolve`], but reads interface addresses from `interfaces`.
///
/// `interfaces` is only called if the specification contains template actions.
pub fn resolve_with<F>(spec: &str, interfaces: F) -> Result<ResolvedAddress, AddressError>
where
    F: FnOnce() -> Result<Vec<InterfaceAddr>, String>,
{
    let addr = expand_template(spec, interfaces).map_err(|reason| AddressError::Template {
        spec: spec.to_owned(),
        reason,
    })?;

    let format_error = |reason| AddressError::Format {
        addr: addr.clone(),
        reason,
    };

    let (host, port) = split_host_port(&addr).map_err(format_error)?;
    if host.is_empty() {
        return Err(AddressError::EmptyHost { addr });
    }

    Ok(ResolvedAddress {
        host: host.to_owned(),
        port: port.to_owned(),
        addr,
    })
}

/// Reads all interface addresses of this host.
fn system_interfaces() -> Result<Vec<InterfaceAddr>, String> {
    let addrs = getifaddrs().map_err(|e| format!("failed to list network interfaces: {e}"))?;

    let interfaces = addrs
        .filter_map(|ifaddr| {
            let storage = ifaddr.address?;
            let ip = if let Some(v4) = storage.as_sockaddr_in() {
                IpAddr::V4(v4.ip())
            } else {
                IpAddr::V6(storage.as_sockaddr_in6()?.ip())
            };

            Some(InterfaceAddr {
                name: ifaddr.interface_name,
                ip,
                up: ifaddr.flags.contains(InterfaceFlags::IFF_UP),
                loopback: ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
            })
        })
        .collect();

    Ok(interfaces)
}

fn expand_template<F>(spec: &str, interfaces: F) -> Result<String, String>
where
    F: FnOnce() -> Result<Vec<InterfaceAddr>, String>,
{
    if !spec.contains(ACTION_START) {
        return Ok(spec.to_owned());
    }

    let interfaces = interfaces()?;
    let mut expanded = String::with_capacity(spec.len());
    let mut rest = spec;

    while let Some(start) = rest.find(ACTION_START) {
        expanded.push_str(&rest[..start]);
        let action = &rest[start + ACTION_START.len()..];
        let end = action
            .find(ACTION_END)
            .ok_or_else(|| "unclosed action".to_owned())?;

        let ip = evaluate(&action[..end], &interfaces)?;
        expanded.push_str(&ip.to_string());
        rest = &action[end + ACTION_END.len()..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

/// Evaluates a single template action to an IP address.
fn evaluate(action: &str, interfaces: &[InterfaceAddr]) -> Result<IpAddr, String> {
    let tokens = tokenize(action)?;
    let Some((Token::Word(function), args)) = tokens.split_first() else {
        return Err(format!("expected a function name in `{}`", action.trim()));
    };

    let args = args
        .iter()
        .map(|token| match token {
            Token::Quoted(arg) => Ok(*arg),
            Token::Word(word) => Err(format!("expected a quoted argument, found `{word}`")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let usable = || interfaces.iter().filter(|i| i.up && !i.loopback);

    match (*function, args.as_slice()) {
        ("GetInterfaceIP", [name]) => interface_ip(interfaces, name, IpAddr::is_ipv4),
        ("GetInterfaceIPv6", [name]) => interface_ip(interfaces, name, IpAddr::is_ipv6),
        ("GetPrivateIP", []) => usable()
            .map(|i| i.ip)
            .find(|ip| matches!(ip, IpAddr::V4(v4) if v4.is_private()))
            .ok_or_else(|| "no private IPv4 address found".to_owned()),
        ("GetPublicIP", []) => usable()
            .map(|i| i.ip)
            .find(|ip| matches!(ip, IpAddr::V4(v4) if is_public(v4)))
            .ok_or_else(|| "no public IPv4 address found".to_owned()),
        ("GetInterfaceIP" | "GetInterfaceIPv6" | "GetPrivateIP" | "GetPublicIP", _) => Err(
            format!("wrong number of arguments for `{function}`"),
        ),
        _ => Err(format!("unknown function `{function}`")),
    }
}

/// Whether `ip` is globally routable, excluding the special-purpose ranges of RFC 6890.
fn is_public(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    let special = ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || a == 0
        // Shared address space, 100.64.0.0/10.
        || (a == 100 && (b & 0xc0) == 64)
        // IETF protocol assignments, 192.0.0.0/24.
        || (a == 192 && b == 0 && c == 0)
        // Benchmarking, 198.18.0.0/15.
        || (a == 198 && (b & 0xfe) == 18)
        // Reserved, 240.0.0.0/4.
        || a >= 240;
    !special
}

fn interface_ip(
    interfaces: &[InterfaceAddr],
    name: &str,
    family: fn(&IpAddr) -> bool,
) -> Result<IpAddr, String> {
    let mut matching = interfaces.iter().filter(|i| i.name == name).peekable();
    if matching.peek().is_none() {
        return Err(format!("interface `{name}` not found"));
    }

    matching
        .map(|i| i.ip)
        .find(family)
        .ok_or_else(|| format!("interface `{name}` has no matching address"))
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
}

fn tokenize(action: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut rest = action.trim_start();

    while !rest.is_empty() {
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| "unterminated string".to_owned())?;
            tokens.push(Token::Quoted(&quoted[..end]));
            rest = &quoted[end + 1..];
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            tokens.push(Token::Word(&rest[..end]));
            rest = &rest[end..];
        }
        rest = rest.trim_start();
    }

    Ok(tokens)
}

/// Splits `host:port` or `[host]:port` into host and port.
fn split_host_port(addr: &str) -> Result<(&str, &str), &'static str> {
    if let Some(bracketed) = addr.strip_prefix('[') {
        let end = bracketed.find(']').ok_or("missing ']' in address")?;
        let port = bracketed[end + 1..]
            .strip_prefix(':')
            .ok_or("missing port in address")?;
        return Ok((&bracketed[..end], port));
    }

    let colon = addr.rfind(':').ok_or("missing port in address")?;
    let host = &addr[..colon];
    if host.contains(':') {
        return Err("too many colons in address");
    }
    if host.contains(['[', ']']) {
        return Err("unexpected bracket in address");
    }

    Ok((host, &addr[colon + 1..]))
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    fn interfaces() -> Result<Vec<InterfaceAddr>, String> {
        let iface = |name: &str, ip: IpAddr, loopback| InterfaceAddr {
            name: name.to_owned(),
            ip,
            up: true,
            loopback,
        };

        Ok(vec![
            iface("lo", IpAddr::V4(Ipv4Addr::LOCALHOST), true),
            iface("eth0", IpAddr::V6("fe80::1".parse().unwrap()), false),
            iface("eth0", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), false),
            iface("eth1", IpAddr::V4(Ipv4Addr::new(100, 64, 1, 2)), false),
            iface("eth2", IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)), false),
        ])
    }

    fn no_interfaces() -> Result<Vec<InterfaceAddr>, String> {
        panic!("interfaces must not be read for literal addresses")
    }

    #[test]
    fn literal_addresses_are_unchanged() {
        for spec in ["localhost:50051", "0.0.0.0:80", "127.0.0.1:0", "[::1]:8080"] {
            let resolved = resolve_with(spec, no_interfaces).unwrap();
            assert_eq!(resolved.as_str(), spec);
        }

        let resolved = resolve_with("[::1]:8080", no_interfaces).unwrap();
        assert_eq!(resolved.host(), "::1");
        assert_eq!(resolved.port(), "8080");
        assert_eq!(resolved.port_number(), Some(8080));
    }

    #[test]
    fn accepts_named_and_empty_ports() {
        let named = resolve_with("localhost:http", no_interfaces).unwrap();
        assert_eq!(named.as_str(), "localhost:http");
        assert_eq!(named.port(), "http");
        assert_eq!(named.port_number(), Some(80));

        let empty = resolve_with("localhost:", no_interfaces).unwrap();
        assert_eq!(empty.as_str(), "localhost:");
        assert_eq!(empty.port_number(), Some(0));

        let unknown = resolve_with("localhost:no-such-service", no_interfaces).unwrap();
        assert_eq!(unknown.port_number(), None);

        let out_of_range = resolve_with("localhost:70000", no_interfaces).unwrap();
        assert_eq!(out_of_range.port_number(), None);
    }

    #[test]
    fn looks_up_services_database() {
        let services = "\
# comment line
http            80/tcp          www     # WorldWideWeb HTTP
domain          53/udp
remotesrv       50051/tcp       chunkstore
";
        assert_eq!(lookup_service(services, "www"), Some(80));
        assert_eq!(lookup_service(services, "chunkstore"), Some(50051));
        assert_eq!(lookup_service(services, "remotesrv"), Some(50051));
        // Only TCP entries count; the builtin table has no `domain`.
        assert_eq!(lookup_service(services, "domain"), None);
        // Falls back to well-known services.
        assert_eq!(lookup_service("", "https"), Some(443));
    }

    #[test]
    fn rejects_empty_host() {
        for spec in [":8080", "[]:8080"] {
            let err = resolve_with(spec, no_interfaces).unwrap_err();
            assert!(matches!(err, AddressError::EmptyHost { .. }), "{spec}: {err}");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for spec in [
            "localhost",
            "::1:80",
            "[::1:80",
            "[::1]80",
            "a]b:80",
        ] {
            let err = resolve_with(spec, no_interfaces).unwrap_err();
            assert!(matches!(err, AddressError::Format { .. }), "{spec}: {err}");
        }
    }

    #[test]
    fn expands_interface_ip() {
        let resolved = resolve_with(r#"{{ GetInterfaceIP "eth0" }}:50051"#, interfaces).unwrap();
        assert_eq!(resolved.as_str(), "10.0.0.5:50051");
        assert_eq!(resolved.host(), "10.0.0.5");
    }

    #[test]
    fn expands_interface_ipv6() {
        let resolved =
            resolve_with(r#"[{{GetInterfaceIPv6 "eth0"}}]:80"#, interfaces).unwrap();
        assert_eq!(resolved.as_str(), "[fe80::1]:80");
        assert_eq!(
            resolved.host().parse::<Ipv6Addr>().unwrap(),
            "fe80::1".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn expands_private_and_public_ip() {
        let private = resolve_with("{{ GetPrivateIP }}:80", interfaces).unwrap();
        assert_eq!(private.as_str(), "10.0.0.5:80");

        let public = resolve_with("{{ GetPublicIP }}:80", interfaces).unwrap();
        assert_eq!(public.as_str(), "93.184.216.34:80");
    }

    #[test]
    fn public_ip_skips_special_purpose_ranges() {
        for ip in [
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(100, 64, 0, 1),
            Ipv4Addr::new(100, 127, 255, 254),
            Ipv4Addr::new(169, 254, 0, 1),
            Ipv4Addr::new(192, 0, 0, 8),
            Ipv4Addr::new(198, 19, 0, 1),
            Ipv4Addr::new(203, 0, 113, 7),
            Ipv4Addr::new(240, 0, 0, 1),
        ] {
            assert!(!is_public(&ip), "{ip}");
        }

        for ip in [
            Ipv4Addr::new(93, 184, 216, 34),
            Ipv4Addr::new(100, 128, 0, 1),
            Ipv4Addr::new(198, 20, 0, 1),
        ] {
            assert!(is_public(&ip), "{ip}");
        }
    }

    #[test]
    fn template_errors_carry_the_spec() {
        for spec in [
            "{{ GetInterfaceIP \"eth0\" :80",
            "{{ GetInterfaceIP \"wlan0\" }}:80",
            "{{ GetInterfaceIP eth0 }}:80",
            "{{ GetInterfaceIP }}:80",
            "{{ GetInterfaceIP \"eth0 }}:80",
            "{{ Bogus }}:80",
            "{{ }}:80",
        ] {
            let err = resolve_with(spec, interfaces).unwrap_err();
            let AddressError::Template { spec: original, .. } = &err else {
                panic!("{spec}: expected template error, got {err}");
            };
            assert_eq!(original, spec);
        }
    }

    #[test]
    fn interface_listing_failures_are_template_errors() {
        let err = resolve_with("{{ GetPrivateIP }}:80", || Err("boom".to_owned())).unwrap_err();
        assert_eq!(
            err,
            AddressError::Template {
                spec: "{{ GetPrivateIP }}:80".to_owned(),
                reason: "boom".to_owned(),
            }
        );
    }

    #[test]
    fn resolves_loopback_from_system() {
        let resolved = resolve("127.0.0.1:0").unwrap();
        assert_eq!(resolved.port_number(), Some(0));
    }
}
