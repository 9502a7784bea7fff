use std::{
    fmt::Debug,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::*;

use crate::error::{SshError, SshResult};

use super::Category;

/// A constructor for one algorithm implementation
pub type Factory<T> = Arc<dyn Fn() -> SshResult<Box<T>> + Send + Sync>;

struct Inner<T: ?Sized> {
    entries: Vec<(String, Factory<T>)>,
    locked: bool,
}

/// Named, ordered set of algorithm implementations of one category
///
/// The order is the preference order, first is most preferred. Readers never
/// block each other; mutations are serialized and refused once the registry
/// has been locked.
pub struct AlgorithmRegistry<T: ?Sized> {
    category: Category,
    inner: RwLock<Inner<T>>,
}

impl<T: ?Sized> Debug for AlgorithmRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} registry: [{}]",
            self.category.as_ref(),
            self.list(None).join(",")
        )
    }
}

impl<T: ?Sized> AlgorithmRegistry<T> {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            inner: RwLock::new(Inner {
                entries: vec![],
                locked: false,
            }),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<T>> {
        // a panic while holding the lock can not leave the table half written
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> SshResult<RwLockWriteGuard<'_, Inner<T>>> {
        let guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if guard.locked {
            let err_msg = self.category.as_ref().to_owned();
            error!("Trying to modify the locked {} registry", err_msg);
            return Err(SshError::RegistryLocked(err_msg));
        }
        Ok(guard)
    }

    /// register `name`, replacing an implementation registered under the same name
    pub fn add<F>(&self, name: &str, factory: F) -> SshResult<()>
    where
        F: Fn() -> SshResult<Box<T>> + Send + Sync + 'static,
    {
        let mut inner = self.write()?;
        let factory: Factory<T> = Arc::new(factory);
        match inner.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = factory,
            None => inner.entries.push((name.to_owned(), factory)),
        }
        Ok(())
    }

    pub fn remove(&self, name: &str) -> SshResult<bool> {
        let mut inner = self.write()?;
        let before = inner.entries.len();
        inner.entries.retain(|(n, _)| n != name);
        Ok(before != inner.entries.len())
    }

    /// keep only the names accepted by `f`
    pub fn retain<F>(&self, f: F) -> SshResult<()>
    where
        F: Fn(&str) -> bool,
    {
        let mut inner = self.write()?;
        inner.entries.retain(|(n, _)| f(n));
        Ok(())
    }

    pub fn clear(&self) -> SshResult<()> {
        self.write()?.entries.clear();
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().entries.iter().any(|(n, _)| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// all names in preference order, `preferred` first if it is registered
    pub fn list(&self, preferred: Option<&str>) -> Vec<String> {
        let inner = self.read();
        let mut names = inner
            .entries
            .iter()
            .map(|(n, _)| n.clone())
            .collect::<Vec<String>>();
        if let Some(p) = preferred {
            if let Some(pos) = names.iter().position(|n| n == p) {
                let first = names.remove(pos);
                names.insert(0, first);
            }
        }
        names
    }

    pub fn factory(&self, name: &str) -> SshResult<Factory<T>> {
        self.read()
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f.clone())
            .ok_or_else(|| SshError::unsupported(self.category.as_ref(), name))
    }

    pub fn instantiate(&self, name: &str) -> SshResult<Box<T>> {
        // do not hold the lock while running foreign code
        let factory = self.factory(name)?;
        factory()
    }

    /// move `name` to `position`, clamped to the end of the list
    pub fn reorder(&self, name: &str, position: usize) -> SshResult<()> {
        let mut inner = self.write()?;
        let from = inner
            .entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| SshError::unsupported(self.category.as_ref(), name))?;
        let entry = inner.entries.remove(from);
        let to = position.min(inner.entries.len());
        inner.entries.insert(to, entry);
        Ok(())
    }

    /// rearrange by a permutation of the current indices
    ///
    /// `indices[i]` names the current index of the entry that becomes i-th.
    pub fn reorder_indices(&self, indices: &[usize]) -> SshResult<()> {
        let mut inner = self.write()?;
        let len = inner.entries.len();
        let mut seen = vec![false; len];
        for &i in indices {
            if i >= len || seen[i] {
                return Err(SshError::GeneralError(format!(
                    "{:?} is not a permutation of 0..{}",
                    indices, len
                )));
            }
            seen[i] = true;
        }
        if indices.len() != len {
            return Err(SshError::GeneralError(format!(
                "{:?} is not a permutation of 0..{}",
                indices, len
            )));
        }
        let reordered = indices
            .iter()
            .map(|&i| inner.entries[i].clone())
            .collect::<Vec<_>>();
        inner.entries = reordered;
        Ok(())
    }

    /// forbid any further mutation
    pub fn lock(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.read().locked
    }
}

impl<T: ?Sized> Clone for AlgorithmRegistry<T> {
    /// an unlocked copy of the table, sharing the factories
    fn clone(&self) -> Self {
        let inner = self.read();
        Self {
            category: self.category,
            inner: RwLock::new(Inner {
                entries: inner.entries.clone(),
                locked: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send {
        fn name(&self) -> &'static str;
    }

    struct A;
    impl Named for A {
        fn name(&self) -> &'static str {
            "a"
        }
    }

    struct B;
    impl Named for B {
        fn name(&self) -> &'static str {
            "b"
        }
    }

    fn registry() -> AlgorithmRegistry<dyn Named> {
        let r = AlgorithmRegistry::<dyn Named>::new(Category::KeyExchange);
        r.add("a", || Ok(Box::new(A) as Box<dyn Named>)).unwrap();
        r.add("b", || Ok(Box::new(B) as Box<dyn Named>)).unwrap();
        r.add("c", || Ok(Box::new(A) as Box<dyn Named>)).unwrap();
        r
    }

    #[test]
    fn list_with_preference() {
        let r = registry();
        assert_eq!(r.list(None), vec!["a", "b", "c"]);
        assert_eq!(r.list(Some("c")), vec!["c", "a", "b"]);
        assert_eq!(r.list(Some("zz")), vec!["a", "b", "c"]);
    }

    #[test]
    fn instantiate_by_name() {
        let r = registry();
        assert_eq!(r.instantiate("b").unwrap().name(), "b");
        assert!(matches!(
            r.instantiate("nope"),
            Err(SshError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn reorder() {
        let r = registry();
        r.reorder("c", 0).unwrap();
        assert_eq!(r.list(None), vec!["c", "a", "b"]);
        r.reorder("c", 100).unwrap();
        assert_eq!(r.list(None), vec!["a", "b", "c"]);
        r.reorder_indices(&[2, 1, 0]).unwrap();
        assert_eq!(r.list(None), vec!["c", "b", "a"]);
        assert!(r.reorder_indices(&[0, 0, 1]).is_err());
        assert!(r.reorder_indices(&[0, 1]).is_err());
    }

    #[test]
    fn locked_refuses_mutation() {
        let r = registry();
        r.lock();
        assert!(matches!(r.add("d", || Ok(Box::new(A) as Box<dyn Named>)), Err(SshError::RegistryLocked(_))));
        assert!(r.remove("a").is_err());
        assert!(r.clear().is_err());
        assert!(r.reorder("a", 1).is_err());
        // reading still works
        assert_eq!(r.list(None).len(), 3);

        let copy = r.clone();
        assert!(!copy.is_locked());
        copy.remove("a").unwrap();
        assert_eq!(copy.list(None), vec!["b", "c"]);
        assert_eq!(r.list(None), vec!["a", "b", "c"]);
    }

    #[test]
    fn add_replaces_same_name() {
        let r = registry();
        r.add("a", || Ok(Box::new(B) as Box<dyn Named>)).unwrap();
        assert_eq!(r.list(None), vec!["a", "b", "c"]);
        assert_eq!(r.instantiate("a").unwrap().name(), "b");
    }
}
