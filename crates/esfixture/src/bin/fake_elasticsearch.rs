//! Stand-in for an Elasticsearch server used by the fixture test suites.
//!
//! The version is taken from an `elasticsearch-X.Y.Z` component of the path
//! the binary was invoked through, so a symlink such as
//! `elasticsearch-1.5.2/bin/elasticsearch` impersonates that release.
//! Settings are read the way a real server reads them: `--key=value` and
//! `-E key=value` arguments, then `elasticsearch.yml` from `ES_PATH_CONF` or
//! `path.conf`. Settings under `fake.` steer the double:
//!
//! - `fake.health_status`: colour reported by `/_cluster/health`.
//! - `fake.startup_delay_ms`: pause before binding the HTTP port.
//! - `fake.exit_code`: exit immediately with this code.
//! - `fake.ignore_sigterm`: keep running after `SIGTERM`.

#![expect(
    clippy::print_stdout,
    clippy::print_stderr,
    reason = "the double reports through its standard streams like a real server"
)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use serde_json::json;
use signal_hook::consts::signal::SIGTERM;

const DEFAULT_VERSION: &str = "6.2.3";
const DEFAULT_CONFIG_FILE: &str = "elasticsearch.yml";

struct Launch {
    pid_file: Option<String>,
    settings: BTreeMap<String, String>,
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let version = args
        .first()
        .and_then(|invoked| version_from_path(invoked))
        .unwrap_or_else(|| DEFAULT_VERSION.to_owned());

    if args
        .iter()
        .skip(1)
        .any(|arg| arg == "--version" || arg == "-V")
    {
        println!("Version: {version}, Build: fake/0000000/2018-01-01T00:00:00Z, JVM: 1.8.0_151");
        return ExitCode::SUCCESS;
    }

    match serve(&version, parse_launch(args.get(1..).unwrap_or_default())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn serve(version: &str, mut launch: Launch) -> Result<(), String> {
    merge_config_file(&mut launch.settings)?;
    let settings = &launch.settings;

    if let Some(requested) = settings.get("fake.exit_code") {
        eprintln!("fake failure requested");
        let code: u8 = requested
            .parse()
            .map_err(|_| format!("bad fake.exit_code '{requested}'"))?;
        std::process::exit(i32::from(code));
    }
    let major: u32 = version
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .unwrap_or(0);
    if major >= 5 && settings.contains_key("discovery.zen.ping.multicast.enabled") {
        return Err(
            "java.lang.IllegalArgumentException: unknown setting \
             [discovery.zen.ping.multicast.enabled]"
                .to_owned(),
        );
    }
    if settings.get("fake.ignore_sigterm").map(String::as_str) == Some("true") {
        signal_hook::flag::register(SIGTERM, Arc::new(AtomicBool::new(false)))
            .map_err(|error| format!("failed to install SIGTERM handler: {error}"))?;
    }
    if let Some(delay) = settings.get("fake.startup_delay_ms") {
        let millis: u64 = delay
            .parse()
            .map_err(|_| format!("bad fake.startup_delay_ms '{delay}'"))?;
        thread::sleep(Duration::from_millis(millis));
    }

    let port: u16 = settings
        .get("http.port")
        .ok_or("http.port is not set")?
        .parse()
        .map_err(|_| "http.port is not a port number".to_owned())?;
    let listener = TcpListener::bind(("127.0.0.1", port)).map_err(|error| {
        if error.kind() == io::ErrorKind::AddrInUse {
            format!(
                "BindHttpException[Failed to bind to [{port}]]; \
                 nested: BindException[Address already in use];"
            )
        } else {
            format!("failed to bind port {port}: {error}")
        }
    })?;
    if let Some(pid_file) = &launch.pid_file {
        fs::write(pid_file, format!("{}\n", std::process::id()))
            .map_err(|error| format!("failed to write pid file {pid_file}: {error}"))?;
    }
    println!("[fake] started version {version} on port {port}");

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                if let Err(error) = respond(stream, version, settings) {
                    eprintln!("[fake] request failed: {error}");
                }
            }
            Err(error) => eprintln!("[fake] accept failed: {error}"),
        }
    }
    Ok(())
}

fn version_from_path(invoked: &str) -> Option<String> {
    Path::new(invoked).components().find_map(|component| {
        let text = component.as_os_str().to_str()?;
        let version = text.strip_prefix("elasticsearch-")?;
        let valid = version.split('.').count() >= 3
            && version.starts_with(|c: char| c.is_ascii_digit());
        valid.then(|| version.to_owned())
    })
}

fn parse_launch(args: &[String]) -> Launch {
    let mut launch = Launch {
        pid_file: None,
        settings: BTreeMap::new(),
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let assignment = if arg == "-p" {
            launch.pid_file = iter.next().cloned();
            None
        } else if arg == "-E" {
            iter.next().map(String::as_str)
        } else if let Some(rest) = arg.strip_prefix("-E") {
            Some(rest)
        } else {
            arg.strip_prefix("--")
        };
        if let Some((key, value)) = assignment.and_then(|text| text.split_once('=')) {
            launch.settings.insert(key.to_owned(), value.to_owned());
        }
    }
    launch
}

/// Adds settings from `elasticsearch.yml`; arguments take precedence.
fn merge_config_file(settings: &mut BTreeMap<String, String>) -> Result<(), String> {
    let dir = env::var("ES_PATH_CONF")
        .ok()
        .or_else(|| settings.get("path.conf").cloned())
        .or_else(|| settings.get("default.path.conf").cloned());
    let Some(dir) = dir else {
        return Ok(());
    };
    if !Path::new(&dir).is_dir() {
        return Err(format!("configuration directory {dir} does not exist"));
    }
    let path = Path::new(&dir).join(DEFAULT_CONFIG_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(format!("failed to read {}: {error}", path.display())),
    };
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            settings
                .entry(key.trim().to_owned())
                .or_insert_with(|| unquote(value.trim()));
        }
    }
    Ok(())
}

fn unquote(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_owned(),
    }
}

fn respond(
    mut stream: TcpStream,
    version: &str,
    settings: &BTreeMap<String, String>,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body)?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts
        .next()
        .unwrap_or("/")
        .split('?')
        .next()
        .unwrap_or("/");
    let cluster_name = settings
        .get("cluster.name")
        .map_or("elasticsearch", String::as_str);

    let (status, payload) = match (method, path) {
        ("GET", "/") => (
            "200 OK",
            json!({
                "name": settings.get("node.name").map_or("fake-node", String::as_str),
                "cluster_name": cluster_name,
                "version": {"number": version},
                "tagline": "You Know, for Search",
            }),
        ),
        ("GET", "/_cluster/health") => (
            "200 OK",
            json!({
                "cluster_name": cluster_name,
                "status": settings.get("fake.health_status").map_or("green", String::as_str),
                "timed_out": false,
                "number_of_nodes": 1,
                "active_shards": 0,
            }),
        ),
        ("DELETE", "/_all" | "/*") => ("200 OK", json!({"acknowledged": true})),
        _ => (
            "404 Not Found",
            json!({"error": format!("no handler for {method} {path}"), "status": 404}),
        ),
    };

    let body = payload.to_string();
    write!(
        stream,
        "HTTP/1.1 {status}\r\ncontent-type: application/json; charset=UTF-8\r\n\
         content-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}
