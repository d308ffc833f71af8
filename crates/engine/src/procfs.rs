//! Virtual procfs entries
//!
//! Client software probes `/proc` before talking to the driver: it looks
//! for its kernel module in `/proc/modules` and reads parallel-port base
//! addresses from `/proc/sys/dev/parport`. These answers make both probes
//! succeed, with base addresses that map back to `/dev/parportN` under the
//! base / 0x10 rule.

use std::path::Path;

const MODULES: &str = "/proc/modules";
const PARPORT_DIR: &str = "/proc/sys/dev/parport/parport";
const BASE_ADDR: &str = "/base-addr";

#[derive(Debug, Clone)]
pub struct VirtualProc {
    module: String,
    port_count: u32,
}

impl VirtualProc {
    /// The module name is the device node's file name
    pub fn new(device_node: &Path, port_count: u32) -> Self {
        let module = device_node
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "windrvr6".to_string());
        Self { module, port_count }
    }

    /// Contents served for `path`, or `None` when the real file should be read
    pub fn contents(&self, path: &Path) -> Option<String> {
        let path = path.to_str()?;
        if path == MODULES {
            return Some(format!(
                "{} 1 0 - Live 0xdeadbeef\nparport_pc 1 0 - Live 0xdeadbeef\n",
                self.module
            ));
        }

        let port: u32 = path
            .strip_prefix(PARPORT_DIR)?
            .strip_suffix(BASE_ADDR)?
            .parse()
            .ok()?;
        if port >= self.port_count {
            return None;
        }
        let base = u64::from(port) * 0x10;
        Some(format!("{}\t{}\n", base, base + 0x400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parport::{DEFAULT_PATH_PREFIX, parport_path};
    use std::path::PathBuf;

    fn proc() -> VirtualProc {
        VirtualProc::new(Path::new("/dev/windrvr6"), 4)
    }

    #[test]
    fn test_modules() {
        let modules = proc().contents(Path::new("/proc/modules")).unwrap();
        let lines: Vec<&str> = modules.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("windrvr6 "));
        assert!(lines[1].starts_with("parport_pc "));
    }

    #[test]
    fn test_base_addr() {
        let p = proc();
        assert_eq!(
            p.contents(Path::new("/proc/sys/dev/parport/parport0/base-addr")).unwrap(),
            "0\t1024\n"
        );
        assert_eq!(
            p.contents(Path::new("/proc/sys/dev/parport/parport3/base-addr")).unwrap(),
            "48\t1072\n"
        );
        assert!(p.contents(Path::new("/proc/sys/dev/parport/parport4/base-addr")).is_none());
        assert!(p.contents(Path::new("/proc/sys/dev/parport/parportx/base-addr")).is_none());
        assert!(p.contents(Path::new("/proc/sys/dev/parport/parport1/modes")).is_none());
        assert!(p.contents(Path::new("/proc/cpuinfo")).is_none());
    }

    #[test]
    fn test_advertised_base_maps_back_to_port() {
        let p = proc();
        for n in 0..4u64 {
            let text = p
                .contents(&PathBuf::from(format!("/proc/sys/dev/parport/parport{}/base-addr", n)))
                .unwrap();
            let base: u64 = text.split('\t').next().unwrap().parse().unwrap();
            assert_eq!(
                parport_path(DEFAULT_PATH_PREFIX, base),
                PathBuf::from(format!("/dev/parport{}", n))
            );
        }
    }
}
