//! Registry of supervised children.
//!
//! A plain vector of records; lookups are linear scans, which is fine for
//! a fleet of tens of processes. Only the supervisor task touches it.

use std::path::Path;

use tracing::debug;

use fdl_core::{AppName, ChildProcess, ChildRole, DomainError, DomainResult, LivenessState};

/// Pad byte for item names shorter than four characters.
const NAME_PAD: u8 = b'_';

#[derive(Debug, Default)]
pub struct ChildRegistry {
    children: Vec<ChildProcess>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks a unique four-character name for `item_name`.
    ///
    /// The first four characters are used, padded with `_`. On collision
    /// the last character is replaced with a digit, `0` through `9`.
    pub fn assign_name(&self, item_name: &str) -> DomainResult<AppName> {
        let mut base = [NAME_PAD; AppName::LEN];
        for (slot, c) in base.iter_mut().zip(item_name.chars()) {
            *slot = if c.is_ascii_graphic() { c as u8 } else { NAME_PAD };
        }

        let candidate = AppName::from_bytes(base);
        if !self.is_taken(candidate) {
            return Ok(candidate);
        }

        let mut bytes = base;
        for digit in b'0'..=b'9' {
            if let Some(last) = bytes.last_mut() {
                *last = digit;
            }
            let candidate = AppName::from_bytes(bytes);
            if !self.is_taken(candidate) {
                debug!(item = item_name, name = %candidate, "Name collision resolved");
                return Ok(candidate);
            }
        }

        Err(DomainError::NameExhausted {
            item_name: item_name.to_string(),
        })
    }

    fn is_taken(&self, name: AppName) -> bool {
        self.children.iter().any(|c| c.assigned_name == name)
    }

    /// Adds a new, not yet launched child and returns its assigned name.
    pub fn register(&mut self, directory: &Path, item_name: &str, role: ChildRole) -> DomainResult<AppName> {
        let name = self.assign_name(item_name)?;
        self.children
            .push(ChildProcess::new(directory.to_path_buf(), item_name, name, role));
        Ok(name)
    }

    pub fn get(&self, name: AppName) -> Option<&ChildProcess> {
        self.children.iter().find(|c| c.assigned_name == name)
    }

    pub fn get_mut(&mut self, name: AppName) -> Option<&mut ChildProcess> {
        self.children.iter_mut().find(|c| c.assigned_name == name)
    }

    /// Child whose latest launch has `pid`.
    pub fn by_pid_mut(&mut self, pid: u32) -> Option<&mut ChildProcess> {
        self.children
            .iter_mut()
            .find(|c| c.process_id == Some(pid))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildProcess> {
        self.children.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChildProcess> {
        self.children.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Pids of children whose latest launch has not been seen to exit.
    pub fn running_pids(&self) -> Vec<u32> {
        self.children
            .iter()
            .filter(|c| !c.has_exited())
            .filter_map(|c| c.process_id)
            .collect()
    }

    /// Copy of every record, for snapshots and listings.
    pub fn snapshot(&self) -> Vec<ChildProcess> {
        self.children.clone()
    }

    pub fn count_in(&self, state: LivenessState) -> usize {
        self.children
            .iter()
            .filter(|c| !c.disabled && c.liveness_state() == state)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(registry: &mut ChildRegistry, item: &str) -> DomainResult<AppName> {
        registry.register(Path::new("/opt/apps"), item, ChildRole::Application)
    }

    #[test]
    fn test_short_names_are_padded() {
        let mut registry = ChildRegistry::new();
        assert_eq!(add(&mut registry, "fd").unwrap().to_string(), "fd__");
        assert_eq!(add(&mut registry, "simm_app").unwrap().to_string(), "simm");
    }

    #[test]
    fn test_collisions_take_digits() {
        let mut registry = ChildRegistry::new();
        assert_eq!(add(&mut registry, "monitor_a").unwrap().to_string(), "moni");
        assert_eq!(add(&mut registry, "monitor_b").unwrap().to_string(), "mon0");
        assert_eq!(add(&mut registry, "monitor_c").unwrap().to_string(), "mon1");
    }

    #[test]
    fn test_names_run_out_after_ten_collisions() {
        let mut registry = ChildRegistry::new();
        for i in 0..11 {
            add(&mut registry, &format!("worker{i}")).unwrap();
        }
        assert_eq!(
            add(&mut registry, "worker_extra"),
            Err(DomainError::NameExhausted {
                item_name: "worker_extra".to_string()
            })
        );
        assert_eq!(registry.len(), 11);
    }

    #[test]
    fn test_lookup_by_pid() {
        let mut registry = ChildRegistry::new();
        let name = add(&mut registry, "simm").unwrap();
        registry.get_mut(name).unwrap().record_launch(Some(4242));
        assert_eq!(registry.by_pid_mut(4242).unwrap().assigned_name, name);
        assert_eq!(registry.running_pids(), vec![4242]);
        assert_eq!(registry.count_in(LivenessState::Unconfirmed), 1);
    }
}
