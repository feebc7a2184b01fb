use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{get_string, KvStore};

pub const USER_NAME_KEY: &str = "userName";
pub const USER_EMAIL_KEY: &str = "userEmail";
pub const USER_PHONE_KEY: &str = "userPhone";
pub const USER_ID_KEY: &str = "userId";
pub const IS_AUTHENTICATED_KEY: &str = "isAuthenticated";

const PROFILE_KEYS: [&str; 5] = [
    IS_AUTHENTICATED_KEY,
    USER_NAME_KEY,
    USER_EMAIL_KEY,
    USER_PHONE_KEY,
    USER_ID_KEY,
];

/// Who the report is about. Written once the hosted auth backend has
/// confirmed the account; every field is optional until then.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "userName", default)]
    pub name: Option<String>,
    #[serde(rename = "userEmail", default)]
    pub email: Option<String>,
    #[serde(rename = "userPhone", default)]
    pub phone: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(rename = "isAuthenticated", default)]
    pub is_authenticated: bool,
}

pub async fn load(store: &dyn KvStore) -> anyhow::Result<UserProfile> {
    Ok(UserProfile {
        name: non_empty(get_string(store, USER_NAME_KEY).await?),
        email: non_empty(get_string(store, USER_EMAIL_KEY).await?),
        phone: non_empty(get_string(store, USER_PHONE_KEY).await?),
        user_id: non_empty(get_string(store, USER_ID_KEY).await?),
        is_authenticated: matches!(
            store.get(IS_AUTHENTICATED_KEY).await?,
            Some(Value::Bool(true))
        ),
    })
}

/// Stores the provided fields and marks the profile authenticated. Fields left
/// as `None` keep whatever was stored before.
pub async fn save(store: &dyn KvStore, profile: &UserProfile) -> anyhow::Result<()> {
    let fields = [
        (USER_NAME_KEY, &profile.name),
        (USER_EMAIL_KEY, &profile.email),
        (USER_PHONE_KEY, &profile.phone),
        (USER_ID_KEY, &profile.user_id),
    ];
    for (key, value) in fields {
        if let Some(v) = value {
            store.set(key, Value::String(v.trim().to_string())).await?;
        }
    }
    store.set(IS_AUTHENTICATED_KEY, Value::Bool(true)).await
}

pub async fn logout(store: &dyn KvStore) -> anyhow::Result<()> {
    store.remove(&PROFILE_KEYS).await
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidSignup {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignupError {
    #[error("All fields are required")]
    MissingField,
    #[error("Please enter your full name")]
    NameTooShort,
    #[error("Please enter a valid email")]
    InvalidEmail,
    #[error("Please enter a valid phone number")]
    InvalidPhone,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error("Passwords do not match")]
    PasswordMismatch,
}

/// Checks a signup form before it is sent to the auth backend. Name, email and
/// phone are trimmed; passwords are taken as typed.
pub fn validate_signup(form: &SignupForm) -> Result<ValidSignup, SignupError> {
    let name = form.name.trim();
    let email = form.email.trim();
    let phone = form.phone.trim();

    if name.is_empty()
        || email.is_empty()
        || phone.is_empty()
        || form.password.is_empty()
        || form.confirm.is_empty()
    {
        return Err(SignupError::MissingField);
    }
    if name.chars().count() < 2 {
        return Err(SignupError::NameTooShort);
    }
    if !email.contains('@') {
        return Err(SignupError::InvalidEmail);
    }
    if phone.chars().count() < 10 {
        return Err(SignupError::InvalidPhone);
    }
    if form.password.chars().count() < 6 {
        return Err(SignupError::PasswordTooShort);
    }
    if form.password != form.confirm {
        return Err(SignupError::PasswordMismatch);
    }

    Ok(ValidSignup {
        name: name.to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;

    fn form() -> SignupForm {
        SignupForm {
            name: "  Ada Lovelace ".to_string(),
            email: "ada@example.com".to_string(),
            phone: "0123456789".to_string(),
            password: "secret1".to_string(),
            confirm: "secret1".to_string(),
        }
    }

    #[test]
    fn valid_form_is_trimmed() {
        let ok = validate_signup(&form()).unwrap();
        assert_eq!(ok.name, "Ada Lovelace");
        assert_eq!(ok.email, "ada@example.com");
    }

    #[test]
    fn validation_order_and_messages() {
        let cases: Vec<(Box<dyn Fn(&mut SignupForm)>, &str)> = vec![
            (Box::new(|f: &mut SignupForm| f.phone = "   ".into()), "All fields are required"),
            (Box::new(|f: &mut SignupForm| f.name = "A".into()), "Please enter your full name"),
            (Box::new(|f: &mut SignupForm| f.email = "ada.example.com".into()), "Please enter a valid email"),
            (Box::new(|f: &mut SignupForm| f.phone = "12345".into()), "Please enter a valid phone number"),
            (
                Box::new(|f: &mut SignupForm| {
                    f.password = "abc".into();
                    f.confirm = "abc".into();
                }),
                "Password must be at least 6 characters",
            ),
            (Box::new(|f: &mut SignupForm| f.confirm = "secret2".into()), "Passwords do not match"),
        ];
        for (mutate, msg) in cases {
            let mut f = form();
            mutate(&mut f);
            assert_eq!(validate_signup(&f).unwrap_err().to_string(), msg);
        }
    }

    #[tokio::test]
    async fn save_load_logout() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(load(&store).await.unwrap(), UserProfile::default());

        save(
            &store,
            &UserProfile {
                name: Some("Ada".into()),
                email: Some("ada@example.com".into()),
                phone: None,
                user_id: Some("uid-1".into()),
                is_authenticated: false,
            },
        )
        .await
        .unwrap();
        let p = load(&store).await.unwrap();
        assert_eq!(p.name.as_deref(), Some("Ada"));
        assert_eq!(p.phone, None);
        assert!(p.is_authenticated);
        assert_eq!(store.get(USER_ID_KEY).await.unwrap(), Some(json!("uid-1")));

        logout(&store).await.unwrap();
        assert_eq!(load(&store).await.unwrap(), UserProfile::default());
    }

    #[test]
    fn profile_json_uses_storage_key_names() {
        let p: UserProfile =
            serde_json::from_value(json!({"userName": "Ada", "isAuthenticated": true})).unwrap();
        assert_eq!(p.name.as_deref(), Some("Ada"));
        assert!(p.is_authenticated);
        assert_eq!(p.email, None);
    }
}
