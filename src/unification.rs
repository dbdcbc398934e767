//! Unification, Prolog style. No backtracking, though. Also we only handle
//! a special case of unification, where one side may contain type variables
//! and the other side is always a concrete type.
//!
//! There's an [introduction to unification on Wikipedia][wiki]. In our case,
//! matching `NVL = Fn<?T>(?T, ?T) -> ?T` against arguments `(INTEGER,
//! NUMERIC)` first binds `?T` to `INTEGER`, and then loosens it to `NUMERIC`
//! so that it can hold both. The result type is whatever `?T` ends up as.
//!
//! ## Why we have an easier time
//!
//! When we unify two types, `t1` and `t2`, we know that only `t1` may contain
//! type variables. `t2` is always a concrete type. This eliminates the need
//! for many of the special cases that a general unification algorithm would
//! need to handle.
//!
//! [wiki]: https://en.wikipedia.org/wiki/Unification_(computer_science)

use std::collections::BTreeMap;

use crate::{
    errors::{Error, Result},
    tokenizer::Spanned,
    types::{ArgType, MatchMode, TypeInfo, TypeVar},
};

/// A unification table.
#[derive(Debug, Default)]
pub struct UnificationTable {
    mappings: BTreeMap<TypeVar, TypeInfo>,
}

impl UnificationTable {
    /// Declare a new type variable. All type variables start out as `NULL`,
    /// which fits anywhere.
    pub fn declare(&mut self, var: TypeVar, spanned: &dyn Spanned) -> Result<()> {
        if self.mappings.insert(var.clone(), TypeInfo::Null).is_some() {
            return Err(Error::annotated(
                format!("duplicate type variable in signature: {}", var),
                spanned.span(),
                "function declaration incorrect",
            ));
        }
        Ok(())
    }

    /// Update a type variable to a type that can hold both its old value
    /// and `ty`. Returns `None` if there is no such type.
    pub fn update(
        &mut self,
        var: &TypeVar,
        ty: &TypeInfo,
        spanned: &dyn Spanned,
    ) -> Result<Option<TypeInfo>> {
        match self.mappings.get_mut(var) {
            Some(old_ty) => match old_ty.common_supertype(ty) {
                Some(new_ty) => {
                    *old_ty = new_ty.clone();
                    Ok(Some(new_ty))
                }
                None => Ok(None),
            },
            None => Err(Error::annotated(
                format!("unknown type variable: {}", var),
                spanned.span(),
                "function declaration incorrect",
            )),
        }
    }

    /// Get the type of a type variable.
    pub fn get(&self, var: &TypeVar) -> Option<&TypeInfo> {
        self.mappings.get(var)
    }
}

/// Interface for types supporting unification.
pub trait Unify: Sized {
    /// Unify `self` with the concrete type `other`, updating any type
    /// variables in `self`. Returns `None` if `other` doesn't fit.
    fn unify(
        &self,
        other: &TypeInfo,
        mode: MatchMode,
        table: &mut UnificationTable,
        spanned: &dyn Spanned,
    ) -> Result<Option<TypeInfo>>;

    /// Resolve any type variables in `self`.
    fn resolve(&self, table: &UnificationTable, spanned: &dyn Spanned) -> Result<TypeInfo>;
}

impl Unify for ArgType {
    fn unify(
        &self,
        other: &TypeInfo,
        mode: MatchMode,
        table: &mut UnificationTable,
        spanned: &dyn Spanned,
    ) -> Result<Option<TypeInfo>> {
        match (self, other) {
            (ArgType::Any, _) => Ok(Some(other.clone())),
            (ArgType::Var(var), _) => table.update(var, other, spanned),
            (ArgType::Scalar(kind), TypeInfo::Null) => Ok(Some(TypeInfo::Scalar(*kind))),
            (ArgType::Scalar(kind), TypeInfo::Unknown) if mode == MatchMode::Widening => {
                Ok(Some(TypeInfo::Scalar(*kind)))
            }
            (ArgType::Scalar(kind), TypeInfo::Scalar(actual)) => {
                let fits = match mode {
                    MatchMode::Exact => actual.same_kind(*kind),
                    MatchMode::Widening => actual.widens_to(*kind),
                };
                Ok(fits.then(|| TypeInfo::Scalar(*kind)))
            }
            (ArgType::Scalar(_), _) => Ok(None),
        }
    }

    fn resolve(&self, table: &UnificationTable, spanned: &dyn Spanned) -> Result<TypeInfo> {
        match self {
            ArgType::Scalar(kind) => Ok(TypeInfo::Scalar(*kind)),
            ArgType::Any => Ok(TypeInfo::Unknown),
            ArgType::Var(var) => table.get(var).cloned().ok_or_else(|| {
                Error::annotated(
                    format!("unknown type variable: {}", var),
                    spanned.span(),
                    "function declaration incorrect",
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{tokenizer::Span, types::ScalarKind};

    #[test]
    fn type_variables_widen_to_hold_every_argument() {
        let mut table = UnificationTable::default();
        let var = TypeVar::new("T").unwrap();
        table.declare(var.clone(), &Span::Unknown).unwrap();
        let param = ArgType::Var(var.clone());
        let int = TypeInfo::Scalar(ScalarKind::Integer);
        let num = TypeInfo::NUMERIC;
        param
            .unify(&int, MatchMode::Exact, &mut table, &Span::Unknown)
            .unwrap();
        param
            .unify(&num, MatchMode::Exact, &mut table, &Span::Unknown)
            .unwrap();
        assert_eq!(table.get(&var), Some(&num));
        assert_eq!(
            param
                .unify(&TypeInfo::TEXT, MatchMode::Exact, &mut table, &Span::Unknown)
                .unwrap(),
            None
        );
    }

    #[test]
    fn duplicate_type_variables_are_rejected() {
        let mut table = UnificationTable::default();
        let var = TypeVar::new("T").unwrap();
        table.declare(var.clone(), &Span::Unknown).unwrap();
        assert!(table.declare(var, &Span::Unknown).is_err());
    }
}
