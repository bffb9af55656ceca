//! Scoped assignment into a handle and its parent container
//!
//! Assigning through a handle obtained with [`Value::get`] runs in three
//! steps: [`WriteBack::begin`] frees the value the handle holds,
//! [`WriteBack::install`] stores the converted replacement, and
//! [`WriteBack::commit`] writes it into the parent at the remembered key.
//! A guard dropped without an explicit commit commits on drop; a failure
//! there can only be logged.

use tracing::warn;

use crate::convert::IntoJs;
use crate::error::HostResult;
use crate::value::Value;

/// Write-back guard over one handle.
pub struct WriteBack<'a> {
    handle: &'a mut Value,
    pending: bool,
}

impl<'a> WriteBack<'a> {
    /// Detach the handle's current value.
    pub fn begin(handle: &'a mut Value) -> Self {
        handle.clear_value();
        Self {
            handle,
            pending: false,
        }
    }

    /// Convert `value` and make it the handle's value. On failure the handle
    /// stays empty and nothing will be committed.
    pub fn install<T: IntoJs>(&mut self, value: T) -> HostResult<()> {
        self.pending = false;
        let raw = value.into_js(self.handle.context())?;
        self.handle.replace_value(raw);
        self.pending = true;
        Ok(())
    }

    /// Write the installed value into the parent, if the handle has one.
    pub fn commit(mut self) -> HostResult<()> {
        self.pending = false;
        self.write_parent()
    }

    fn write_parent(&self) -> HostResult<()> {
        let (Some((parent, key)), Some(raw)) = (self.handle.parent(), self.handle.raw()) else {
            return Ok(());
        };
        let ctx = self.handle.context();
        let engine = ctx.engine();
        ctx.check(engine.set_property(parent, &key.to_property_key(), engine.dup(raw)))
    }
}

impl Drop for WriteBack<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        self.pending = false;
        if let Err(error) = self.write_parent() {
            warn!(%error, "write-back commit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;

    #[test]
    fn test_commit_writes_parent() {
        let ctx = Context::new().unwrap();
        let root = Value::new_object(&ctx).unwrap();
        let mut child = root.get("name").unwrap();
        assert!(child.is_empty());

        let mut guard = WriteBack::begin(&mut child);
        guard.install("hostjs").unwrap();
        guard.commit().unwrap();

        assert_eq!(root.get("name").unwrap().to::<String>().unwrap(), "hostjs");
    }

    #[test]
    fn test_drop_commits_pending_value() {
        let ctx = Context::new().unwrap();
        let root = Value::new_object(&ctx).unwrap();
        let mut child = root.get("n").unwrap();
        {
            let mut guard = WriteBack::begin(&mut child);
            guard.install(5).unwrap();
        }
        assert_eq!(root.get("n").unwrap().to::<i32>().unwrap(), 5);
        assert_eq!(child.to::<i32>().unwrap(), 5);
    }

    #[test]
    fn test_begin_releases_old_value() {
        let ctx = Context::new().unwrap();
        let root = Value::new_object(&ctx).unwrap();
        let mut child = root.get("obj").unwrap();
        child.set(Value::new_object(&ctx).unwrap()).unwrap();
        let old = child.clone();
        // held by root, `child` and `old`
        assert_eq!(old.ref_count(), 3);

        let guard = WriteBack::begin(&mut child);
        drop(guard);
        assert_eq!(old.ref_count(), 2);
        assert!(child.is_empty());
    }

    #[test]
    fn test_handle_without_parent_commits_nothing() {
        let ctx = Context::new().unwrap();
        let mut loose = Value::undefined(&ctx);
        let mut guard = WriteBack::begin(&mut loose);
        guard.install(vec![1, 2, 3]).unwrap();
        guard.commit().unwrap();
        assert_eq!(loose.to::<Vec<i32>>().unwrap(), vec![1, 2, 3]);
    }
}
