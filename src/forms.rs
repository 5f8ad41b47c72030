//! Client-side input checks run before any request is made.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{DashError, DashResult};
use crate::types::{AwsAccount, AwsAccountRequest, NewTarget, Secret};

pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Trim and check a target submission. Accepts a single address or CIDR.
pub fn validate_target(address: &str, description: &str) -> DashResult<NewTarget> {
    let addr = address.trim();
    if addr.is_empty() {
        return Err(DashError::validation("Please enter an IP address or subnet"));
    }
    if addr.parse::<IpAddr>().is_err() && addr.parse::<IpNet>().is_err() {
        return Err(DashError::validation(format!(
            "Invalid IP address or CIDR notation: {addr}"
        )));
    }
    Ok(NewTarget {
        target: addr.to_string(),
        description: description.trim().to_string(),
    })
}

/// Create/edit form for an AWS account.
///
/// The secret is write-once: a form built from an existing account starts
/// with an empty secret, and the user has to supply it again on every save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsAccountForm {
    pub account_name: String,
    pub access_key_id: String,
    pub secret_access_key: Secret,
    pub region: String,
    editing: Option<i64>,
}

impl Default for AwsAccountForm {
    fn default() -> Self {
        Self {
            account_name: String::new(),
            access_key_id: String::new(),
            secret_access_key: Secret::default(),
            region: DEFAULT_AWS_REGION.to_string(),
            editing: None,
        }
    }
}

impl AwsAccountForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edit(account: &AwsAccount) -> Self {
        Self {
            account_name: account.account_name.clone(),
            access_key_id: account.access_key_id.clone(),
            secret_access_key: Secret::default(),
            region: account.region.clone(),
            editing: Some(account.id),
        }
    }

    /// Id of the account being edited, `None` for a new one.
    pub fn editing(&self) -> Option<i64> {
        self.editing
    }

    pub fn validate(&self) -> DashResult<AwsAccountRequest> {
        let account_name = self.account_name.trim();
        if account_name.is_empty() {
            return Err(DashError::validation("Account name is required"));
        }
        let access_key_id = self.access_key_id.trim();
        if access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return Err(DashError::validation(
                "Access key ID and secret access key are required",
            ));
        }
        let region = match self.region.trim() {
            "" => DEFAULT_AWS_REGION,
            r => r,
        };
        Ok(AwsAccountRequest {
            account_name: account_name.to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: Secret::new(self.secret_access_key.expose().trim()),
            region: region.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_address_is_trimmed_and_checked() {
        let t = validate_target("  10.0.0.5/24 ", " lab ").unwrap();
        assert_eq!(t.target, "10.0.0.5/24");
        assert_eq!(t.description, "lab");
        assert!(validate_target("192.168.1.1", "").is_ok());
        assert!(validate_target("2001:db8::/32", "").is_ok());
    }

    #[test]
    fn empty_or_garbage_target_is_rejected() {
        assert!(matches!(validate_target("   ", "x"), Err(DashError::Validation(_))));
        assert!(matches!(validate_target("10.0.0.300", ""), Err(DashError::Validation(_))));
        assert!(matches!(validate_target("example.com", ""), Err(DashError::Validation(_))));
    }

    #[test]
    fn edit_form_never_prefills_secret() {
        let acct = AwsAccount {
            id: 4,
            account_name: "prod".into(),
            access_key_id: "AKIA123".into(),
            region: "eu-west-1".into(),
            created_at: None,
            updated_at: None,
        };
        let form = AwsAccountForm::edit(&acct);
        assert_eq!(form.editing(), Some(4));
        assert!(form.secret_access_key.is_empty());
        assert_eq!(form.access_key_id, "AKIA123");
        // Saving without re-entering the secret is refused.
        assert!(matches!(form.validate(), Err(DashError::Validation(_))));
    }

    #[test]
    fn form_requires_name_and_defaults_region() {
        let mut f = AwsAccountForm::new();
        f.access_key_id = "AKIA".into();
        f.secret_access_key = Secret::new("s3cret");
        assert!(f.validate().is_err());
        f.account_name = "dev".into();
        f.region = " ".into();
        let req = f.validate().unwrap();
        assert_eq!(req.region, DEFAULT_AWS_REGION);
        assert_eq!(req.secret_access_key.expose(), "s3cret");
    }
}
