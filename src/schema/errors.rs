// Compile-pass error accumulation
//
// Every compile step records its failures here instead of returning early, so
// one pass reports every problem in the schema. Errors are tagged with the
// scope chain (file, type, field) active when they were recorded.

use std::ops::{Deref, DerefMut};

use crate::internal::error::{Error, Result, SchemaErrorRecord, SchemaErrors};

/// Error list and scope stack threaded through one compile pass.
#[derive(Debug, Default)]
pub struct CompileContext {
    errors: Vec<SchemaErrorRecord>,
    scopes: Vec<String>,
    line: Option<u32>,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters a named scope until the returned guard is dropped.
    pub fn scope(&mut self, name: impl Into<String>) -> ScopeGuard<'_> {
        let line = self.line;
        self.scope_at(name, line)
    }

    /// Enters a named scope whose errors are attributed to `line`.
    pub fn scope_at(&mut self, name: impl Into<String>, line: Option<u32>) -> ScopeGuard<'_> {
        let depth = self.scopes.len();
        let saved_line = self.line;
        self.scopes.push(name.into());
        if line.is_some() {
            self.line = line;
        }
        ScopeGuard {
            ctx: self,
            depth,
            saved_line,
        }
    }

    /// Records an error in the current scope.
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(SchemaErrorRecord {
            message: message.into(),
            scope: self.scopes.clone(),
            line: self.line,
        });
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns `value` if nothing was recorded, otherwise every recorded error.
    pub fn finish<T>(self, value: T) -> Result<T> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(Error::Schema(SchemaErrors(self.errors)))
        }
    }
}

/// Pops its scope (and restores the line) when dropped, including on early return.
pub struct ScopeGuard<'c> {
    ctx: &'c mut CompileContext,
    depth: usize,
    saved_line: Option<u32>,
}

impl Deref for ScopeGuard<'_> {
    type Target = CompileContext;

    fn deref(&self) -> &CompileContext {
        self.ctx
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut CompileContext {
        self.ctx
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.ctx.scopes.truncate(self.depth);
        self.ctx.line = self.saved_line;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_nest_and_unwind() {
        let mut ctx = CompileContext::new();
        {
            let mut file = ctx.scope("game.fbs");
            {
                let mut table = file.scope_at("Monster", Some(4));
                table.error("duplicate field index 1");
                let mut field = table.scope("hp");
                field.error("bad default");
                assert_eq!(field.scopes(), ["game.fbs", "Monster", "hp"]);
            }
            assert_eq!(file.scopes(), ["game.fbs"]);
            file.error("missing root type");
        }
        assert!(ctx.scopes().is_empty());

        let err = ctx.finish(()).unwrap_err();
        let errors = match err {
            Error::Schema(errors) => errors,
            other => panic!("unexpected error {:?}", other),
        };
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.0[0].scope_path(), "game.fbs.Monster");
        assert_eq!(errors.0[0].line, Some(4));
        assert_eq!(errors.0[1].scope_path(), "game.fbs.Monster.hp");
        assert_eq!(errors.0[1].line, Some(4));
        assert_eq!(errors.0[2].line, None);
    }

    #[test]
    fn test_scope_popped_on_early_return() {
        fn step(ctx: &mut CompileContext) -> Option<()> {
            let mut scope = ctx.scope("Weapon");
            scope.error("unknown type");
            None?;
            Some(())
        }

        let mut ctx = CompileContext::new();
        assert!(step(&mut ctx).is_none());
        assert!(ctx.scopes().is_empty());
        assert_eq!(ctx.error_count(), 1);
    }

    #[test]
    fn test_finish_without_errors() {
        let ctx = CompileContext::new();
        assert_eq!(ctx.finish(7).unwrap(), 7);
    }
}
