//! Social-graph collaborator: friend and party rosters for scoped broadcasts
//!
//! The connection registry never stores relationships; it only resolves the
//! player ids returned here to live transports.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};

use crate::config::SocialApiConfig;
use crate::ws::protocol::PlayerId;

use super::kv::StoreError;

#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn friends_of(&self, player_id: &PlayerId) -> Result<Vec<PlayerId>, StoreError>;

    /// Members of the player's current party, including the player
    async fn party_members_of(&self, player_id: &PlayerId) -> Result<Vec<PlayerId>, StoreError>;
}

/// Fixed rosters held in memory; used when no social API is configured and
/// as the test double
#[derive(Debug, Default)]
pub struct StaticRoster {
    friends: DashMap<PlayerId, Vec<PlayerId>>,
    parties: DashMap<PlayerId, Vec<PlayerId>>,
}

impl StaticRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mutual friendship
    pub fn add_friendship(&self, a: &PlayerId, b: &PlayerId) {
        self.friends.entry(a.clone()).or_default().push(b.clone());
        self.friends.entry(b.clone()).or_default().push(a.clone());
    }

    /// Put every listed player in the same party
    pub fn set_party(&self, members: &[PlayerId]) {
        for member in members {
            self.parties.insert(member.clone(), members.to_vec());
        }
    }
}

#[async_trait]
impl RosterProvider for StaticRoster {
    async fn friends_of(&self, player_id: &PlayerId) -> Result<Vec<PlayerId>, StoreError> {
        Ok(self
            .friends
            .get(player_id)
            .map(|f| f.clone())
            .unwrap_or_default())
    }

    async fn party_members_of(&self, player_id: &PlayerId) -> Result<Vec<PlayerId>, StoreError> {
        Ok(self
            .parties
            .get(player_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

/// PostgREST-backed roster reader (`friendships` and `party_members` tables)
#[derive(Clone)]
pub struct RestRoster {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct FriendRow {
    friend_id: PlayerId,
}

#[derive(Debug, Deserialize)]
struct PartyRow {
    party_id: String,
}

#[derive(Debug, Deserialize)]
struct MemberRow {
    user_id: PlayerId,
}

impl RestRoster {
    pub fn new(config: &SocialApiConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Make an authenticated GET request
    async fn get<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl RosterProvider for RestRoster {
    async fn friends_of(&self, player_id: &PlayerId) -> Result<Vec<PlayerId>, StoreError> {
        let query = format!("user_id=eq.{}&select=friend_id", player_id);
        let rows: Vec<FriendRow> = self.get("friendships", &query).await?;
        Ok(rows.into_iter().map(|r| r.friend_id).collect())
    }

    async fn party_members_of(&self, player_id: &PlayerId) -> Result<Vec<PlayerId>, StoreError> {
        let query = format!("user_id=eq.{}&select=party_id&limit=1", player_id);
        let parties: Vec<PartyRow> = self.get("party_members", &query).await?;
        let Some(party) = parties.into_iter().next() else {
            return Ok(Vec::new());
        };

        let query = format!("party_id=eq.{}&select=user_id", party.party_id);
        let members: Vec<MemberRow> = self.get("party_members", &query).await?;
        Ok(members.into_iter().map(|m| m.user_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_roster_is_symmetric_for_friends() {
        let roster = StaticRoster::new();
        let (a, b) = (PlayerId::from("a"), PlayerId::from("b"));
        roster.add_friendship(&a, &b);

        assert_eq!(roster.friends_of(&a).await.unwrap(), vec![b.clone()]);
        assert_eq!(roster.friends_of(&b).await.unwrap(), vec![a.clone()]);
        assert!(roster.friends_of(&PlayerId::from("c")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn static_roster_parties() {
        let roster = StaticRoster::new();
        let members = vec![PlayerId::from("a"), PlayerId::from("b")];
        roster.set_party(&members);

        assert_eq!(roster.party_members_of(&PlayerId::from("b")).await.unwrap(), members);
    }
}
