//! ZFS administrative client.
//!
//! Every operation is a single command line sent through a [`CommandRunner`].
//! The client keeps no state between calls; in particular dataset listings
//! are never cached.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::command::{CommandOutput, CommandRunner, command_line};
use super::parse::{DatasetRecord, parse_listing, parse_rows};
use crate::error::CsiError;

const LISTING_COLUMNS: &str = "name,mountpoint,quota";

/// Text `zfs share` prints (with a non-zero exit) when the dataset is already
/// exported.
const ALREADY_SHARED: &str = "filesystem already shared";

/// Value `zfs get` prints for a property that is not set.
const UNSET: &str = "-";

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_owned()).collect()
}

/// Whether `name` is a direct child of `parent` (`""` means the pool level).
fn is_child(parent: &str, name: &str) -> bool {
    match name.rsplit_once('/') {
        Some((dir, _)) => dir == parent.trim_end_matches('/'),
        None => parent.is_empty(),
    }
}

pub struct ZfsClient {
    runner: Arc<dyn CommandRunner>,
    sudo: bool,
}

impl ZfsClient {
    /// `sudo` prefixes every command with `sudo`.
    pub fn new(runner: Arc<dyn CommandRunner>, sudo: bool) -> Self {
        Self { runner, sudo }
    }

    fn render(&self, args: &[String]) -> String {
        let line = command_line(args);
        if self.sudo { format!("sudo {line}") } else { line }
    }

    /// Run a command and return its raw result without judging the exit
    /// status.
    async fn exec(&self, args: &[String]) -> Result<(String, CommandOutput), CsiError> {
        let command = self.render(args);
        info!(%command, "running command");
        let out = self.runner.run(&command).await?;
        debug!(%command, success = out.success, output = %out.output, "command finished");
        Ok((command, out))
    }

    /// Run a command that must succeed, returning its output.
    async fn run(&self, args: &[String]) -> Result<String, CsiError> {
        let (command, out) = self.exec(args).await?;
        if !out.success {
            return Err(CsiError::CommandFailed {
                command,
                output: out.output,
            });
        }
        Ok(out.output)
    }

    /// Every dataset on the host.
    pub async fn list_all(&self) -> Result<Vec<DatasetRecord>, CsiError> {
        let out = self
            .run(&argv(&["zfs", "list", "-H", "-o", LISTING_COLUMNS]))
            .await?;
        Ok(parse_listing(&out)?)
    }

    /// Datasets directly below `parent`, without `parent` itself.
    pub async fn list_children(&self, parent: &str) -> Result<Vec<DatasetRecord>, CsiError> {
        let mut args = argv(&["zfs", "list", "-H", "-o", LISTING_COLUMNS, "-d", "1"]);
        if !parent.is_empty() {
            args.push(parent.to_owned());
        }
        let out = self.run(&args).await?;
        Ok(parse_listing(&out)?
            .into_iter()
            .filter(|r| is_child(parent, &r.name))
            .collect())
    }

    async fn find(&self, path: &str) -> Result<Option<DatasetRecord>, CsiError> {
        Ok(self.list_all().await?.into_iter().find(|r| r.name == path))
    }

    pub async fn exists(&self, path: &str) -> Result<bool, CsiError> {
        Ok(self.find(path).await?.is_some())
    }

    pub async fn mountpoint(&self, path: &str) -> Result<String, CsiError> {
        self.find(path)
            .await?
            .map(|r| r.mountpoint)
            .ok_or_else(|| CsiError::DatasetNotFound(path.to_owned()))
    }

    /// Create `path` with `properties` unless it already exists.
    ///
    /// Returns whether a dataset was created.
    #[instrument(skip(self, properties))]
    pub async fn create_if_absent(
        &self,
        path: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<bool, CsiError> {
        if self.exists(path).await? {
            debug!(dataset = path, "dataset already exists, skipping create");
            return Ok(false);
        }
        let mut args = argv(&["zfs", "create"]);
        for (key, value) in properties {
            args.push("-o".to_owned());
            args.push(format!("{key}={value}"));
        }
        args.push(path.to_owned());
        self.run(&args).await?;
        Ok(true)
    }

    pub async fn set_quota(&self, path: &str, bytes: u64) -> Result<(), CsiError> {
        self.run(&argv(&["zfs", "set", &format!("quota={bytes}"), path]))
            .await
            .map(drop)
    }

    /// Export `path` over NFS.  Sharing an already shared dataset succeeds.
    pub async fn share(&self, path: &str) -> Result<(), CsiError> {
        let (command, out) = self.exec(&argv(&["zfs", "share", path])).await?;
        if out.success || out.output.contains(ALREADY_SHARED) {
            return Ok(());
        }
        Err(CsiError::CommandFailed {
            command,
            output: out.output,
        })
    }

    /// Apply permission `mode` to the dataset's mountpoint directory.
    pub async fn chmod(&self, path: &str, mode: &str) -> Result<(), CsiError> {
        let mountpoint = self.mountpoint(path).await?;
        self.run(&argv(&["chmod", mode, &mountpoint])).await.map(drop)
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), CsiError> {
        self.run(&argv(&["zfs", "rename", from, to])).await.map(drop)
    }

    /// Value of one property, `None` when it is not set.
    pub async fn get_property(&self, path: &str, key: &str) -> Result<Option<String>, CsiError> {
        let out = self
            .run(&argv(&["zfs", "get", "-H", "-o", "value", key, path]))
            .await?;
        let rows = parse_rows(&out, 1)?;
        match rows.as_slice() {
            [row] if row[0] == UNSET => Ok(None),
            [row] => Ok(Some(row[0].clone())),
            _ => Err(CsiError::Internal(format!(
                "expected one value for {key} on {path}, got {} rows",
                rows.len()
            ))),
        }
    }

    /// Values of several properties in one call; unset properties are left
    /// out of the result.
    pub async fn get_properties(
        &self,
        path: &str,
        keys: &[&str],
    ) -> Result<BTreeMap<String, String>, CsiError> {
        let out = self
            .run(&argv(&[
                "zfs",
                "get",
                "-H",
                "-o",
                "property,value",
                &keys.join(","),
                path,
            ]))
            .await?;
        Ok(parse_rows(&out, 2)?
            .into_iter()
            .filter(|row| row[1] != UNSET)
            .map(|mut row| (std::mem::take(&mut row[0]), std::mem::take(&mut row[1])))
            .collect())
    }

    pub async fn set_property(&self, path: &str, key: &str, value: &str) -> Result<(), CsiError> {
        self.run(&argv(&["zfs", "set", &format!("{key}={value}"), path]))
            .await
            .map(drop)
    }

    /// Set all `properties` in a single command.
    pub async fn set_properties(
        &self,
        path: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), CsiError> {
        if properties.is_empty() {
            return Ok(());
        }
        let mut args = argv(&["zfs", "set"]);
        args.extend(properties.iter().map(|(k, v)| format!("{k}={v}")));
        args.push(path.to_owned());
        self.run(&args).await.map(drop)
    }

    /// First filesystem whose properties match every entry of `criteria`.
    #[instrument(skip(self))]
    pub async fn find_by_properties(
        &self,
        criteria: &BTreeMap<String, String>,
    ) -> Result<Option<String>, CsiError> {
        if criteria.is_empty() {
            return Err(CsiError::InvalidArgument(
                "property search needs at least one criterion".into(),
            ));
        }
        let columns: Vec<&str> = std::iter::once("name")
            .chain(criteria.keys().map(String::as_str))
            .collect();
        let out = self
            .run(&argv(&[
                "zfs",
                "list",
                "-H",
                "-t",
                "filesystem",
                "-o",
                &columns.join(","),
            ]))
            .await?;

        let rows = parse_rows(&out, columns.len())?;
        Ok(rows
            .into_iter()
            .find(|row| criteria.values().zip(&row[1..]).all(|(want, got)| want == got))
            .map(|mut row| std::mem::take(&mut row[0])))
    }
}
