//! Validator and operator roles.
//!
//! Roles are plain capability predicates checked at each entry point.
//! Revoking a validator only affects the future: completed operations keep
//! their history, and unfinished operations stop counting that validator's
//! approval (and stop counting it in the quorum denominator).

use std::collections::BTreeSet;

use parking_lot::RwLock;

use crossbridge_types::{AccountId, BridgeError, Result, ValidatorId};

/// Who may vote and who may administer the bridge.
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    validators: RwLock<BTreeSet<ValidatorId>>,
    operators: RwLock<BTreeSet<AccountId>>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one initial operator, who can then grant everything else.
    #[must_use]
    pub fn with_operator(operator: AccountId) -> Self {
        let registry = Self::new();
        registry.operators.write().insert(operator);
        registry
    }

    /// Register a validator. Returns `false` if it was already registered.
    ///
    /// # Errors
    /// `InvalidRequest` for a null validator id.
    pub fn grant(&self, validator: ValidatorId) -> Result<bool> {
        if validator.is_null() {
            return Err(BridgeError::InvalidRequest {
                reason: "validator id must not be empty".to_string(),
            });
        }
        let added = self.validators.write().insert(validator.clone());
        if added {
            tracing::info!(validator = %validator, "Validator granted");
        }
        Ok(added)
    }

    /// Remove a validator. Returns `false` if it was not registered.
    pub fn revoke(&self, validator: &ValidatorId) -> bool {
        let removed = self.validators.write().remove(validator);
        if removed {
            tracing::info!(validator = %validator, "Validator revoked");
        }
        removed
    }

    pub fn is_validator(&self, validator: &ValidatorId) -> bool {
        self.validators.read().contains(validator)
    }

    /// Number of currently registered validators (the quorum denominator).
    pub fn validator_count(&self) -> usize {
        self.validators.read().len()
    }

    pub fn validators(&self) -> Vec<ValidatorId> {
        self.validators.read().iter().cloned().collect()
    }

    /// # Errors
    /// `InvalidRequest` for a null account.
    pub fn grant_operator(&self, operator: AccountId) -> Result<bool> {
        if operator.is_null() {
            return Err(BridgeError::InvalidRequest {
                reason: "operator account must not be a null address".to_string(),
            });
        }
        let added = self.operators.write().insert(operator.clone());
        if added {
            tracing::info!(operator = %operator, "Operator granted");
        }
        Ok(added)
    }

    pub fn revoke_operator(&self, operator: &AccountId) -> bool {
        let removed = self.operators.write().remove(operator);
        if removed {
            tracing::info!(operator = %operator, "Operator revoked");
        }
        removed
    }

    pub fn is_operator(&self, account: &AccountId) -> bool {
        self.operators.read().contains(account)
    }

    /// # Errors
    /// `NotAnOperator` unless `account` holds the operator role.
    pub fn require_operator(&self, account: &AccountId) -> Result<()> {
        if self.is_operator(account) {
            Ok(())
        } else {
            Err(BridgeError::NotAnOperator(account.clone()))
        }
    }

    /// # Errors
    /// `NotAValidator` unless `validator` is registered.
    pub fn require_validator(&self, validator: &ValidatorId) -> Result<()> {
        if self.is_validator(validator) {
            Ok(())
        } else {
            Err(BridgeError::NotAValidator(validator.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_revoke() {
        let registry = ValidatorRegistry::new();
        let v = ValidatorId::new("v1");
        assert!(registry.grant(v.clone()).unwrap());
        assert!(!registry.grant(v.clone()).unwrap());
        assert!(registry.is_validator(&v));
        assert_eq!(registry.validator_count(), 1);

        assert!(registry.revoke(&v));
        assert!(!registry.revoke(&v));
        assert!(!registry.is_validator(&v));
        assert!(matches!(
            registry.require_validator(&v),
            Err(BridgeError::NotAValidator(_))
        ));
    }

    #[test]
    fn null_ids_rejected() {
        let registry = ValidatorRegistry::new();
        assert!(registry.grant(ValidatorId::new("")).is_err());
        assert!(registry.grant_operator(AccountId::new("0x0000")).is_err());
    }

    #[test]
    fn operator_role() {
        let admin = AccountId::new("0xad");
        let registry = ValidatorRegistry::with_operator(admin.clone());
        assert!(registry.is_operator(&admin));
        assert!(registry.require_operator(&admin).is_ok());

        let stranger = AccountId::new("0x5e");
        assert!(matches!(
            registry.require_operator(&stranger),
            Err(BridgeError::NotAnOperator(_))
        ));
        assert!(registry.revoke_operator(&admin));
        assert!(!registry.is_operator(&admin));
    }

    #[test]
    fn validators_listed_in_order() {
        let registry = ValidatorRegistry::new();
        registry.grant(ValidatorId::new("v2")).unwrap();
        registry.grant(ValidatorId::new("v1")).unwrap();
        assert_eq!(
            registry.validators(),
            vec![ValidatorId::new("v1"), ValidatorId::new("v2")]
        );
    }
}
