use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::User;

/// Owns the current user. The id is fixed; attributes may be replaced.
pub struct UserHolder {
    user: RwLock<User>,
}

impl UserHolder {
    pub fn new(user: User) -> Self {
        Self {
            user: RwLock::new(user),
        }
    }

    pub fn user(&self) -> User {
        self.user.read().clone()
    }

    pub fn user_id(&self) -> String {
        self.user.read().id.clone()
    }

    pub fn update_attributes(&self, attributes: HashMap<String, String>) {
        self.user.write().data = attributes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_attributes_keeps_id() {
        let holder = UserHolder::new(User::new("user").with_attribute("plan", "free"));
        let mut attributes = HashMap::new();
        attributes.insert("plan".to_string(), "pro".to_string());

        holder.update_attributes(attributes);

        let user = holder.user();
        assert_eq!(user.id, "user");
        assert_eq!(user.attributes().get("plan").map(String::as_str), Some("pro"));
    }
}
