//! Recognition-server endpoint normalization.
//!
//! User-entered server addresses arrive in every imaginable shape: bare
//! hosts, LAN addresses with ports, full URLs with trailing slashes.
//! This module canonicalizes them into a stable base URL and decides
//! which candidate URLs a caller should try when the server turns out
//! to run without the `/api` route prefix.

/// Production endpoint used when no (valid) server URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://totalcode.indevs.in/api";

const API_SUFFIX: &str = "/api";

struct ParsedUrl {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

/// Canonicalize a user-supplied server address into a base URL.
///
/// Empty or unparseable input falls back to [`DEFAULT_BASE_URL`].
/// Local/private hosts (`localhost`, `127.0.0.1`, `10.0.2.2`,
/// `192.168.x.y`) keep plain `http`; on any other host an explicit
/// `http` scheme is upgraded to `https`. An empty path becomes `/api`;
/// trailing slashes are stripped. The result is idempotent:
/// `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(input: &str) -> String {
    let raw = input.trim();
    if raw.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }

    let with_scheme = if has_scheme(raw) {
        raw.to_string()
    } else if looks_like_local_host(raw) {
        format!("http://{raw}")
    } else {
        format!("https://{raw}")
    };

    let Some(parsed) = split_url(&with_scheme) else {
        return DEFAULT_BASE_URL.to_string();
    };
    if parsed.host.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }

    let local = is_local_host(&parsed.host);
    let scheme = parsed.scheme.to_ascii_lowercase();
    // Only plain http on a non-local host is upgraded; other schemes
    // pass through untouched.
    let scheme = if scheme == "http" && !local {
        "https".to_string()
    } else {
        scheme
    };

    let path = normalize_path(&parsed.path);
    let authority = build_authority(&parsed.host, parsed.port);

    format!("{scheme}://{authority}{path}")
}

/// Base URLs to try, in order: the normalized endpoint first, then (if
/// it carries the `/api` prefix) the same endpoint without it, for
/// servers still exposing the legacy non-prefixed routes.
pub fn candidates(input: &str) -> Vec<String> {
    let primary = normalize(input);
    let mut urls = vec![primary.clone()];
    if let Some(stripped) = primary.strip_suffix(API_SUFFIX) {
        let stripped = stripped.to_string();
        if !urls.contains(&stripped) {
            urls.push(stripped);
        }
    }
    urls
}

/// Whether a response indicates the route does not exist at this base
/// URL (as opposed to the request itself failing).
///
/// True for 404/405/501, and for bodies carrying "not found"/"404"
/// markers that are not parseable JSON — a reverse proxy's HTML error
/// page rather than an application-level response.
pub fn is_route_mismatch(status: u16, body: &str) -> bool {
    if matches!(status, 404 | 405 | 501) {
        return true;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return false;
    }

    let lowered = trimmed.to_ascii_lowercase();
    if !lowered.contains("not found") && !lowered.contains("404") {
        return false;
    }

    !is_json_payload(trimmed)
}

fn is_json_payload(body: &str) -> bool {
    let trimmed = body.trim();
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
}

fn has_scheme(value: &str) -> bool {
    let Some(idx) = value.find("://") else {
        return false;
    };
    let scheme = &value[..idx];
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
        }
        _ => false,
    }
}

/// Best-effort host extraction from a scheme-less address, used only to
/// decide which scheme to infer.
fn looks_like_local_host(value: &str) -> bool {
    let authority = value.split(['/', '?', '#']).next().unwrap_or(value);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let host = match split_authority(authority) {
        Some((host, _)) => host,
        None => authority
            .split(':')
            .next()
            .unwrap_or(authority)
            .to_string(),
    };
    is_local_host(&host)
}

fn is_local_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "localhost" || host == "127.0.0.1" || host == "10.0.2.2" || is_private_192(&host)
}

fn is_private_192(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    parts.len() == 4
        && parts[0] == "192"
        && parts[1] == "168"
        && parts[2..].iter().all(|octet| {
            !octet.is_empty() && octet.chars().all(|c| c.is_ascii_digit())
        })
}

fn split_url(value: &str) -> Option<ParsedUrl> {
    let idx = value.find("://")?;
    let scheme = &value[..idx];
    let rest = &value[idx + 3..];

    let (authority, path) = match rest.find(['/', '?', '#']) {
        Some(pos) if rest.as_bytes()[pos] == b'/' => (&rest[..pos], &rest[pos..]),
        Some(pos) => (&rest[..pos], ""),
        None => (rest, ""),
    };
    // Query and fragment never belong in a base URL.
    let path = path.split(['?', '#']).next().unwrap_or("");
    let authority = authority.rsplit('@').next().unwrap_or(authority);

    let (host, port) = split_authority(authority)?;
    Some(ParsedUrl {
        scheme: scheme.to_string(),
        host,
        port,
        path: path.to_string(),
    })
}

fn split_authority(authority: &str) -> Option<(String, Option<u16>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        // Bracketed IPv6 literal, optionally followed by :port.
        let end = rest.find(']')?;
        let host = rest[..end].to_string();
        let after = &rest[end + 1..];
        return match after.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if after.is_empty() => Some((host, None)),
            None => None,
        };
    }

    if authority.matches(':').count() >= 2 {
        // Bare IPv6 literal without brackets — the whole thing is the host.
        return Some((authority.to_string(), None));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), Some(port.parse().ok()?))),
        None => Some((authority.to_string(), None)),
    }
}

fn normalize_path(path: &str) -> String {
    if path.trim().is_empty() || path == "/" {
        return API_SUFFIX.to_string();
    }

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        API_SUFFIX.to_string()
    } else {
        trimmed.to_string()
    }
}

fn build_authority(host: &str, port: Option<u16>) -> String {
    let host_part = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    match port {
        Some(port) => format!("{host_part}:{port}"),
        None => host_part,
    }
}
