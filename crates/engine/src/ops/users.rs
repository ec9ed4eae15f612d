use sea_orm::{ActiveValue, QueryFilter, prelude::*};

use crate::{EngineError, ResultEngine, users};

use super::{Engine, normalize_required_name};

impl Engine {
    /// Creates a user. Usernames are unique.
    pub async fn create_user(&self, username: &str, password: &str) -> ResultEngine<users::Model> {
        let username = normalize_required_name(username, "username")?;
        if password.is_empty() {
            return Err(EngineError::InvalidName(
                "password must not be empty".to_string(),
            ));
        }

        if self.user_by_username(&username).await?.is_some() {
            return Err(EngineError::ExistingKey(username));
        }

        let model = users::ActiveModel {
            id: ActiveValue::NotSet,
            username: ActiveValue::Set(username),
            password: ActiveValue::Set(password.to_string()),
        }
        .insert(&self.database)
        .await?;
        tracing::info!(user_id = model.id, username = %model.username, "user created");
        Ok(model)
    }

    pub async fn user_by_username(&self, username: &str) -> ResultEngine<Option<users::Model>> {
        Ok(users::Entity::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.database)
            .await?)
    }

    pub async fn user(&self, user_id: i32) -> ResultEngine<users::Model> {
        users::Entity::find_by_id(user_id)
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("user not exists".to_string()))
    }
}
