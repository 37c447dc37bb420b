//! Config file loading (spec §6): `directive value` lines, `#` comments.
//! Grounded on `gamerunner_config.rs`'s "accept a config path, fall back to
//! defaults" shape, but the grammar itself is the spec-mandated line format
//! rather than the teacher's `serdeconv` TOML loading -- this store's config
//! is an explicit, non-TOML requirement.

use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendFsync {
    No,
    Always,
    EverySec,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: Option<String>,
    pub timeout: u64,
    pub save_points: Vec<(u64, u64)>,
    pub dir: String,
    pub loglevel: LogLevel,
    pub logfile: String,
    pub databases: usize,
    pub maxclients: usize,
    pub maxmemory: usize,
    pub slaveof: Option<(String, u16)>,
    pub masterauth: Option<String>,
    pub glueoutputbuf: bool,
    pub shareobjects: bool,
    pub shareobjectspoolsize: usize,
    pub rdbcompression: bool,
    pub daemonize: bool,
    pub appendonly: bool,
    pub appendfsync: AppendFsync,
    pub requirepass: Option<String>,
    pub pidfile: String,
    pub dbfilename: String,
    pub appendfilename: String,
    pub vm_enabled: bool,
    pub vm_swap_file: String,
    pub vm_max_memory: usize,
    pub vm_page_size: usize,
    pub vm_pages: usize,
    pub vm_max_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            port: 6379,
            bind: None,
            timeout: 300,
            save_points: vec![(900, 1), (300, 10), (60, 10_000)],
            dir: ".".to_owned(),
            loglevel: LogLevel::Notice,
            logfile: "stdout".to_owned(),
            databases: 16,
            maxclients: 10_000,
            maxmemory: 0,
            slaveof: None,
            masterauth: None,
            glueoutputbuf: true,
            shareobjects: true,
            shareobjectspoolsize: 10_000,
            rdbcompression: true,
            daemonize: false,
            appendonly: false,
            appendfsync: AppendFsync::EverySec,
            requirepass: None,
            pidfile: "ferrikvd.pid".to_owned(),
            dbfilename: "dump.rdb".to_owned(),
            appendfilename: "appendonly.aof".to_owned(),
            vm_enabled: false,
            vm_swap_file: "ferrikvd.swap".to_owned(),
            vm_max_memory: 0,
            vm_page_size: ferrikv_vm::DEFAULT_PAGE_SIZE,
            vm_pages: 1 << 20,
            vm_max_threads: 4,
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ServerConfig, String> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| format!("cannot read config file: {}", e))?;
        let mut config = ServerConfig::default();
        let mut save_points_set = false;

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let directive = parts.next().unwrap_or("").to_ascii_lowercase();
            let rest = parts.next().unwrap_or("").trim();

            apply_directive(&mut config, &directive, rest, &mut save_points_set)
                .map_err(|e| format!("config error on line {}: {}", lineno + 1, e))?;
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(format!("expected yes/no, got {:?}", other)),
    }
}

fn apply_directive(
    config: &mut ServerConfig,
    directive: &str,
    rest: &str,
    save_points_set: &mut bool,
) -> Result<(), String> {
    match directive {
        "port" => config.port = rest.parse().map_err(|_| "invalid port")?,
        "bind" => config.bind = Some(rest.to_owned()),
        "timeout" => config.timeout = rest.parse().map_err(|_| "invalid timeout")?,
        "save" => {
            let mut tokens = rest.split_whitespace();
            let secs: u64 = tokens.next().ok_or("missing save seconds")?.parse().map_err(|_| "invalid save seconds")?;
            let changes: u64 = tokens.next().ok_or("missing save changes")?.parse().map_err(|_| "invalid save changes")?;
            if !*save_points_set {
                config.save_points.clear();
                *save_points_set = true;
            }
            config.save_points.push((secs, changes));
        }
        "dir" => config.dir = rest.to_owned(),
        "loglevel" => {
            config.loglevel = match rest {
                "debug" => LogLevel::Debug,
                "verbose" => LogLevel::Verbose,
                "notice" => LogLevel::Notice,
                "warning" => LogLevel::Warning,
                other => return Err(format!("unknown loglevel {:?}", other)),
            }
        }
        "logfile" => config.logfile = rest.to_owned(),
        "databases" => config.databases = rest.parse().map_err(|_| "invalid databases")?,
        "maxclients" => config.maxclients = rest.parse().map_err(|_| "invalid maxclients")?,
        "maxmemory" => config.maxmemory = rest.parse().map_err(|_| "invalid maxmemory")?,
        "slaveof" => {
            let mut tokens = rest.split_whitespace();
            let host = tokens.next().ok_or("missing slaveof host")?.to_owned();
            let port: u16 = tokens.next().ok_or("missing slaveof port")?.parse().map_err(|_| "invalid slaveof port")?;
            config.slaveof = Some((host, port));
        }
        "masterauth" => config.masterauth = Some(rest.to_owned()),
        "glueoutputbuf" => config.glueoutputbuf = parse_bool(rest)?,
        "shareobjects" => config.shareobjects = parse_bool(rest)?,
        "shareobjectspoolsize" => config.shareobjectspoolsize = rest.parse().map_err(|_| "invalid shareobjectspoolsize")?,
        "rdbcompression" => config.rdbcompression = parse_bool(rest)?,
        "daemonize" => config.daemonize = parse_bool(rest)?,
        "appendonly" => config.appendonly = parse_bool(rest)?,
        "appendfsync" => {
            config.appendfsync = match rest {
                "no" => AppendFsync::No,
                "always" => AppendFsync::Always,
                "everysec" => AppendFsync::EverySec,
                other => return Err(format!("unknown appendfsync {:?}", other)),
            }
        }
        "requirepass" => config.requirepass = Some(rest.to_owned()),
        "pidfile" => config.pidfile = rest.to_owned(),
        "dbfilename" => config.dbfilename = rest.to_owned(),
        "appendfilename" => config.appendfilename = rest.to_owned(),
        "vm-enabled" => config.vm_enabled = parse_bool(rest)?,
        "vm-swap-file" => config.vm_swap_file = rest.to_owned(),
        "vm-max-memory" => config.vm_max_memory = rest.parse().map_err(|_| "invalid vm-max-memory")?,
        "vm-page-size" => config.vm_page_size = rest.parse().map_err(|_| "invalid vm-page-size")?,
        "vm-pages" => config.vm_pages = rest.parse().map_err(|_| "invalid vm-pages")?,
        "vm-max-threads" => config.vm_max_threads = rest.parse().map_err(|_| "invalid vm-max-threads")?,
        other => return Err(format!("unknown directive {:?}", other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> tempfile_path::TempConfig {
        tempfile_path::TempConfig::new(contents)
    }

    mod tempfile_path {
        use std::io::Write;
        pub struct TempConfig(std::path::PathBuf);
        impl TempConfig {
            pub fn new(contents: &str) -> TempConfig {
                let path = std::env::temp_dir().join(format!(
                    "ferrikv-config-test-{}-{}.conf",
                    std::process::id(),
                    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
                ));
                let mut file = std::fs::File::create(&path).unwrap();
                file.write_all(contents.as_bytes()).unwrap();
                TempConfig(path)
            }
            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }
        impl Drop for TempConfig {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    #[test]
    fn parses_basic_directives_and_comments() {
        let cfg = write_config(
            "# a comment\nport 7000\nloglevel debug\nappendonly yes\nappendfsync always\n",
        );
        let config = ServerConfig::from_file(cfg.path()).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.loglevel, LogLevel::Debug);
        assert!(config.appendonly);
        assert_eq!(config.appendfsync, AppendFsync::Always);
    }

    #[test]
    fn first_save_directive_resets_the_defaults() {
        let cfg = write_config("save 100 5\nsave 10 50\n");
        let config = ServerConfig::from_file(cfg.path()).unwrap();
        assert_eq!(config.save_points, vec![(100, 5), (10, 50)]);
    }

    #[test]
    fn slaveof_parses_host_and_port() {
        let cfg = write_config("slaveof 10.0.0.1 6380\n");
        let config = ServerConfig::from_file(cfg.path()).unwrap();
        assert_eq!(config.slaveof, Some(("10.0.0.1".to_owned(), 6380)));
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let cfg = write_config("bogus value\n");
        assert!(ServerConfig::from_file(cfg.path()).is_err());
    }
}
