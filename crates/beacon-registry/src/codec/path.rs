//! Store key layout
//!
//! Keys are laid out as `scheme/service/node`. Service and node names have
//! every `/` replaced by `-` before joining, so `a/b` and `a-b` map to the same
//! key. Joining cleans the result like a slash path: empty elements are
//! skipped, `.` segments vanish and `..` pops the previous segment.

/// Store path separator
pub const SEPARATOR: char = '/';

/// Replace every path separator in a name with `-`
pub fn sanitize(name: &str) -> String {
    name.replace(SEPARATOR, "-")
}

/// Key prefix of all nodes of a service (without the trailing separator)
pub fn service_path(scheme: &str, service_name: &str) -> String {
    join(&[scheme, &sanitize(service_name)])
}

/// Key of a single node
pub fn node_path(scheme: &str, service_name: &str, node_name: &str) -> String {
    join(&[scheme, &sanitize(service_name), &sanitize(node_name)])
}

/// Bare node name of a key listed under a service prefix.
///
/// Returns `None` when the key does not live directly under the service.
pub fn node_name_from_key<'a>(scheme: &str, service_name: &str, key: &'a str) -> Option<&'a str> {
    let prefix = service_path(scheme, service_name);
    let rest = key.strip_prefix(prefix.as_str())?;
    let name = rest.strip_prefix(SEPARATOR)?;
    (!name.is_empty() && !name.contains(SEPARATOR)).then_some(name)
}

fn join(elements: &[&str]) -> String {
    let parts: Vec<&str> = elements.iter().copied().filter(|e| !e.is_empty()).collect();
    if parts.is_empty() {
        return String::new();
    }
    clean(&parts.join("/"))
}

fn clean(path: &str) -> String {
    let rooted = path.starts_with(SEPARATOR);
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => match segments.last().copied() {
                Some(last) if last != ".." => {
                    segments.pop();
                }
                _ if rooted => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
