#![allow(dead_code)]
//! Shared in-memory doubles for integration tests

use alert_service::error::Result;
use alert_service::models::{Device, Member, MemberRole};
use alert_service::services::{Audience, DeviceStore, PushPayload, PushRelay, PushSubscription, RelayError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

pub fn member(id: i64, unit: Option<&str>, role: MemberRole) -> Member {
    Member {
        id,
        organization_id: 1,
        display_name: format!("member-{id}"),
        role,
        unit: unit.map(String::from),
        is_active: true,
    }
}

pub fn device(member_id: i64, endpoint: &str, is_active: bool) -> Device {
    Device {
        id: Uuid::new_v4(),
        member_id,
        endpoint: endpoint.to_string(),
        p256dh_key: "p256dh".to_string(),
        auth_key: "auth".to_string(),
        is_active,
        last_seen_at: Utc::now(),
        created_at: Utc::now(),
    }
}

pub struct InMemoryDeviceStore {
    members: Vec<Member>,
    devices: Mutex<Vec<Device>>,
}

impl InMemoryDeviceStore {
    pub fn new(members: Vec<Member>, devices: Vec<Device>) -> Self {
        Self {
            members,
            devices: Mutex::new(devices),
        }
    }

    pub fn is_active(&self, endpoint: &str) -> bool {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.endpoint == endpoint && d.is_active)
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn active_devices(&self) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.is_active)
            .cloned()
            .collect())
    }

    async fn active_devices_for(&self, audience: &Audience) -> Result<Vec<Device>> {
        let devices = self.devices.lock().unwrap();
        Ok(devices
            .iter()
            .filter(|d| d.is_active)
            .filter(|d| {
                self.members
                    .iter()
                    .find(|m| m.id == d.member_id)
                    .map(|m| m.is_active && audience.matches(m))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn deactivate(&self, device_id: Uuid) -> Result<()> {
        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.iter_mut().find(|d| d.id == device_id) {
            device.is_active = false;
        }
        Ok(())
    }

    async fn upsert_subscription(
        &self,
        member_id: i64,
        subscription: &PushSubscription,
    ) -> Result<Uuid> {
        let mut devices = self.devices.lock().unwrap();
        if let Some(existing) = devices.iter_mut().find(|d| d.endpoint == subscription.endpoint) {
            existing.member_id = member_id;
            existing.p256dh_key = subscription.p256dh.clone();
            existing.auth_key = subscription.auth.clone();
            existing.is_active = true;
            existing.last_seen_at = Utc::now();
            return Ok(existing.id);
        }
        let mut created = device(member_id, &subscription.endpoint, true);
        created.p256dh_key = subscription.p256dh.clone();
        created.auth_key = subscription.auth.clone();
        let id = created.id;
        devices.push(created);
        Ok(id)
    }

    async fn deactivate_by_endpoint(&self, endpoint: &str) -> Result<bool> {
        let mut devices = self.devices.lock().unwrap();
        match devices.iter_mut().find(|d| d.endpoint == endpoint) {
            Some(device) => {
                device.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn member_devices(&self, member_id: i64) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.member_id == member_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockRelay {
    gone: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockRelay {
    pub fn fail_gone(&self, endpoint: &str) {
        self.gone.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushRelay for MockRelay {
    async fn send(
        &self,
        subscription: &PushSubscription,
        _payload: &PushPayload,
    ) -> std::result::Result<(), RelayError> {
        self.calls.lock().unwrap().push(subscription.endpoint.clone());
        if self.gone.lock().unwrap().contains(&subscription.endpoint) {
            return Err(RelayError::SubscriptionGone);
        }
        Ok(())
    }
}
