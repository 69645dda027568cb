//! Absolute-path joining for route groups.
//!
//! Group base paths are resolved once, when the group or route is created.
//! Nothing here runs on the request path.

/// Lexically normalizes a slash-separated path: repeated separators collapse,
/// `.` segments vanish and `..` removes the preceding segment. A rooted `..`
/// at the top stays at `/`.
pub(crate) fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_owned();
    }

    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if !rooted => segments.push(".."),
                _ => {}
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}

/// Joins `relative` onto `absolute`.
///
/// An empty `relative` returns `absolute` untouched. A trailing slash on
/// `relative` survives cleaning, so `/api` + `/users/` is `/api/users/`.
pub(crate) fn join(absolute: &str, relative: &str) -> String {
    if relative.is_empty() {
        return absolute.to_owned();
    }

    let combined = if absolute.is_empty() {
        relative.to_owned()
    } else {
        format!("{absolute}/{relative}")
    };
    let mut joined = clean(&combined);

    if relative.ends_with('/') && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}
