//! In-memory stand-ins for the storage host and the node's mount table.
//!
//! [`FakeZfs`] interprets the command lines [`ZfsClient`] sends over a dataset
//! table, answering with output in the same shape `zfs -H` produces.
//!
//! [`ZfsClient`]: super::client::ZfsClient

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;

use super::command::{CommandOutput, CommandRunner};
use super::node::{HostResolver, Mounter};
use crate::error::CsiError;

#[derive(Debug, Clone, Default)]
pub struct FakeDataset {
    pub mountpoint: String,
    pub quota: Option<u64>,
    pub properties: BTreeMap<String, String>,
    pub shared: bool,
}

#[derive(Default)]
struct State {
    datasets: BTreeMap<String, FakeDataset>,
    modes: HashMap<String, String>,
    log: Vec<String>,
    overrides: Vec<(String, CommandOutput)>,
}

#[derive(Default)]
pub struct FakeZfs {
    state: Mutex<State>,
}

fn missing(name: &str) -> CommandOutput {
    CommandOutput::failed(format!("cannot open '{name}': dataset does not exist\n"))
}

fn usage(command: &str) -> CommandOutput {
    CommandOutput::failed(format!("fake zfs: unsupported command line: {command}\n"))
}

fn parent_of(name: &str) -> Option<&str> {
    name.rsplit_once('/').map(|(dir, _)| dir)
}

fn depth_below(parent: &str, name: &str) -> Option<usize> {
    if name == parent {
        return Some(0);
    }
    name.strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| rest.split('/').count())
}

fn render_quota(quota: Option<u64>) -> String {
    const UNITS: [(u64, &str); 4] = [(1 << 40, "T"), (1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];
    let Some(bytes) = quota else {
        return "none".to_owned();
    };
    for (size, suffix) in UNITS {
        if bytes >= size && bytes % size == 0 {
            return format!("{}{suffix}", bytes / size);
        }
    }
    bytes.to_string()
}

/// Split a command line the way a POSIX shell would for the quoting that
/// `command_line` produces.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            word.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\'' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if !quoted => {
                escaped = true;
                in_word = true;
            }
            ' ' if !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            _ => {
                word.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(word);
    }
    words
}

impl FakeZfs {
    /// A host with the given datasets, mounted at `/<name>`, without quota.
    pub fn with_datasets(names: &[&str]) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.lock();
            for name in names {
                state.datasets.insert(
                    (*name).to_owned(),
                    FakeDataset {
                        mountpoint: format!("/{name}"),
                        ..Default::default()
                    },
                );
            }
        }
        fake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert(&self, name: &str, dataset: FakeDataset) {
        self.lock().datasets.insert(name.to_owned(), dataset);
    }

    pub fn dataset(&self, name: &str) -> Option<FakeDataset> {
        self.lock().datasets.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().datasets.keys().cloned().collect()
    }

    /// Every command line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().log.clear();
    }

    /// Permission mode last applied to `dir` with `chmod`.
    pub fn mode(&self, dir: &str) -> Option<String> {
        self.lock().modes.get(dir).cloned()
    }

    /// Answer any command starting with `prefix` with `output` (success).
    pub fn override_output(&self, prefix: &str, output: &str) {
        self.lock()
            .overrides
            .push((prefix.to_owned(), CommandOutput::ok(output)));
    }

    /// Fail any command starting with `prefix` with `output`, leaving the
    /// datasets untouched.
    pub fn fail_command(&self, prefix: &str, output: &str) {
        self.lock()
            .overrides
            .push((prefix.to_owned(), CommandOutput::failed(output)));
    }

    pub fn clear_overrides(&self) {
        self.lock().overrides.clear();
    }

    fn execute(state: &mut State, command: &str) -> CommandOutput {
        let mut words = split_words(command);
        if words.first().map(String::as_str) == Some("sudo") {
            words.remove(0);
        }
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["zfs", "list", rest @ ..] => Self::list(state, rest),
            ["zfs", "get", "-H", "-o", columns, keys, name] => {
                Self::get(state, columns, keys, name, command)
            }
            ["zfs", "set", rest @ .., name] if !rest.is_empty() => Self::set(state, rest, name),
            ["zfs", "create", rest @ .., name] => Self::create(state, rest, name, command),
            ["zfs", "rename", from, to] => Self::rename(state, from, to),
            ["zfs", "share", name] => match state.datasets.get_mut(*name) {
                None => missing(name),
                Some(ds) if ds.shared => CommandOutput::failed(format!(
                    "cannot share '{name}': filesystem already shared\n"
                )),
                Some(ds) => {
                    ds.shared = true;
                    CommandOutput::ok("")
                }
            },
            ["chmod", mode, dir] => {
                state.modes.insert((*dir).to_owned(), (*mode).to_owned());
                CommandOutput::ok("")
            }
            _ => usage(command),
        }
    }

    fn list(state: &State, args: &[&str]) -> CommandOutput {
        let mut columns = "name,mountpoint,quota";
        let mut depth = None;
        let mut root = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match *arg {
                "-H" => {}
                "-o" => columns = iter.next().copied().unwrap_or_default(),
                "-t" => {
                    iter.next();
                }
                "-d" => depth = iter.next().and_then(|d| d.parse::<usize>().ok()),
                name => root = Some(name),
            }
        }
        if let Some(root) = root
            && !state.datasets.contains_key(root)
        {
            return missing(root);
        }

        let mut out = String::new();
        for (name, ds) in &state.datasets {
            let level = match root {
                Some(root) => depth_below(root, name),
                None => Some(name.split('/').count() - 1),
            };
            match (level, depth) {
                (None, _) => continue,
                (Some(level), Some(max)) if level > max => continue,
                _ => {}
            }
            let row: Vec<String> = columns
                .split(',')
                .map(|col| match col {
                    "name" => name.clone(),
                    "mountpoint" => ds.mountpoint.clone(),
                    "quota" => render_quota(ds.quota),
                    key => ds.properties.get(key).cloned().unwrap_or_else(|| "-".into()),
                })
                .collect();
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        CommandOutput::ok(out)
    }

    fn get(state: &State, columns: &str, keys: &str, name: &str, command: &str) -> CommandOutput {
        let Some(ds) = state.datasets.get(name) else {
            return missing(name);
        };
        let mut out = String::new();
        for key in keys.split(',') {
            let value = match key {
                "quota" => render_quota(ds.quota),
                "mountpoint" => ds.mountpoint.clone(),
                _ => ds.properties.get(key).cloned().unwrap_or_else(|| "-".into()),
            };
            match columns {
                "value" => out.push_str(&value),
                "property,value" => out.push_str(&format!("{key}\t{value}")),
                _ => return usage(command),
            }
            out.push('\n');
        }
        CommandOutput::ok(out)
    }

    fn set(state: &mut State, assignments: &[&str], name: &str) -> CommandOutput {
        let Some(ds) = state.datasets.get_mut(name) else {
            return missing(name);
        };
        for assignment in assignments {
            let Some((key, value)) = assignment.split_once('=') else {
                return CommandOutput::failed(format!("bad property assignment '{assignment}'\n"));
            };
            if key == "quota" {
                match value.parse::<u64>() {
                    Ok(bytes) => ds.quota = Some(bytes),
                    Err(_) => {
                        return CommandOutput::failed(format!("bad quota '{value}'\n"));
                    }
                }
            } else {
                ds.properties.insert(key.to_owned(), value.to_owned());
            }
        }
        CommandOutput::ok("")
    }

    fn create(state: &mut State, options: &[&str], name: &str, command: &str) -> CommandOutput {
        if state.datasets.contains_key(name) {
            return CommandOutput::failed(format!("cannot create '{name}': dataset already exists\n"));
        }
        if let Some(parent) = parent_of(name)
            && !state.datasets.contains_key(parent)
        {
            return CommandOutput::failed(format!(
                "cannot create '{name}': parent does not exist\n"
            ));
        }
        let mut properties = BTreeMap::new();
        let mut iter = options.iter();
        while let Some(flag) = iter.next() {
            let option = iter.next().and_then(|kv| kv.split_once('='));
            match (*flag, option) {
                ("-o", Some((key, value))) => {
                    properties.insert(key.to_owned(), value.to_owned());
                }
                _ => return usage(command),
            }
        }
        state.datasets.insert(
            name.to_owned(),
            FakeDataset {
                mountpoint: format!("/{name}"),
                quota: None,
                properties,
                shared: false,
            },
        );
        CommandOutput::ok("")
    }

    fn rename(state: &mut State, from: &str, to: &str) -> CommandOutput {
        if !state.datasets.contains_key(from) {
            return missing(from);
        }
        if state.datasets.contains_key(to) {
            return CommandOutput::failed(format!("cannot rename to '{to}': dataset already exists\n"));
        }
        let moved: Vec<String> = state
            .datasets
            .keys()
            .filter(|n| depth_below(from, n).is_some())
            .cloned()
            .collect();
        for old in moved {
            if let Some(mut ds) = state.datasets.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                ds.mountpoint = format!("/{new}");
                state.datasets.insert(new, ds);
            }
        }
        CommandOutput::ok("")
    }
}

#[async_trait]
impl CommandRunner for FakeZfs {
    async fn run(&self, command: &str) -> Result<CommandOutput, CsiError> {
        let mut state = self.lock();
        state.log.push(command.to_owned());
        let unprefixed = command.strip_prefix("sudo ").unwrap_or(command);
        if let Some((_, output)) = state
            .overrides
            .iter()
            .find(|(prefix, _)| unprefixed.starts_with(prefix.as_str()))
        {
            return Ok(output.clone());
        }
        Ok(Self::execute(&mut state, command))
    }
}

// ---------------------------------------------------------------------------
// Node side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Bind {
        source: String,
        target: String,
        read_only: bool,
    },
    Nfs {
        source: String,
        target: String,
        address: IpAddr,
        read_only: bool,
    },
    Unmount {
        target: String,
    },
}

/// Records mount calls and keeps a set of mounted targets.
#[derive(Default)]
pub struct FakeMounter {
    calls: Mutex<Vec<MountCall>>,
    mounted: Mutex<BTreeSet<String>>,
}

impl FakeMounter {
    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mark_mounted(&self, target: &str) {
        self.mounted.lock().unwrap().insert(target.to_owned());
    }

    fn record(&self, call: MountCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn is_mounted(&self, target: &str) -> Result<bool, CsiError> {
        Ok(self.mounted.lock().unwrap().contains(target))
    }

    async fn bind_mount(&self, source: &str, target: &str, read_only: bool) -> Result<(), CsiError> {
        self.record(MountCall::Bind {
            source: source.to_owned(),
            target: target.to_owned(),
            read_only,
        });
        self.mark_mounted(target);
        Ok(())
    }

    async fn nfs_mount(
        &self,
        source: &str,
        target: &str,
        address: IpAddr,
        read_only: bool,
    ) -> Result<(), CsiError> {
        self.record(MountCall::Nfs {
            source: source.to_owned(),
            target: target.to_owned(),
            address,
            read_only,
        });
        self.mark_mounted(target);
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<(), CsiError> {
        self.record(MountCall::Unmount {
            target: target.to_owned(),
        });
        self.mounted.lock().unwrap().remove(target);
        Ok(())
    }
}

/// Fixed host table that counts lookups.
#[derive(Default)]
pub struct FakeHostResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
    lookups: Mutex<Vec<String>>,
}

impl FakeHostResolver {
    pub fn with_host(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.hosts.insert(host.to_owned(), addrs.to_vec());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostResolver for FakeHostResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, CsiError> {
        self.lookups.lock().unwrap().push(host.to_owned());
        Ok(self.hosts.get(host).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_follow_shell_quoting() {
        assert_eq!(
            split_words(r"zfs set 'k8s:pvc=a b' 'it'\''s' ''"),
            vec!["zfs", "set", "k8s:pvc=a b", "it's", ""]
        );
    }

    #[test]
    fn quota_rendering() {
        assert_eq!(render_quota(None), "none");
        assert_eq!(render_quota(Some(20 << 30)), "20G");
        assert_eq!(render_quota(Some(1536)), "1536");
    }
}
