// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Dummy robot backend for development and testing.
//!
//! Accepts every program immediately and keeps the controller state in
//! memory. No robot required; acknowledgements still have to arrive on the
//! robot event port.

use changer_core::driver::{
    ChangerDriver, DriverAccess, DriverFuture, DriverInfo, DriverStatus, RobotMode, SafetyStatus,
};
use tracing::info;

pub struct DummyDriver {
    info: DriverInfo,
    mode: RobotMode,
    loaded: Option<String>,
    history: Vec<(String, String)>,
}

impl DummyDriver {
    pub fn new() -> Self {
        Self {
            info: DriverInfo {
                manufacturer: "Dummy".to_string(),
                model: "dummy".to_string(),
                access: DriverAccess::None,
            },
            mode: RobotMode::Idle,
            loaded: None,
            history: Vec::new(),
        }
    }

    /// Programs started so far as `(program, tag)`.
    pub fn history(&self) -> &[(String, String)] {
        &self.history
    }

    fn current_status(&self) -> DriverStatus {
        DriverStatus {
            mode: self.mode,
            safety: SafetyStatus::Normal,
            remote_control: true,
            program_running: false,
            loaded_program: self.loaded.clone(),
        }
    }
}

impl Default for DummyDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangerDriver for DummyDriver {
    fn info(&self) -> &DriverInfo {
        &self.info
    }

    fn run_program<'a>(&'a mut self, name: &'a str, tag: &'a str) -> DriverFuture<'a, ()> {
        info!("[dummy] run {} ({})", name, tag);
        self.loaded = Some(name.to_string());
        self.history.push((name.to_string(), tag.to_string()));
        self.mode = RobotMode::Idle;
        Box::pin(std::future::ready(Ok(())))
    }

    fn stop<'a>(&'a mut self) -> DriverFuture<'a, ()> {
        info!("[dummy] stop");
        self.mode = RobotMode::Idle;
        Box::pin(std::future::ready(Ok(())))
    }

    fn pause<'a>(&'a mut self) -> DriverFuture<'a, ()> {
        let result = if self.loaded.is_some() {
            info!("[dummy] pause");
            Ok(())
        } else {
            Err("no program loaded".into())
        };
        Box::pin(std::future::ready(result))
    }

    fn play<'a>(&'a mut self) -> DriverFuture<'a, ()> {
        let result = if self.loaded.is_some() {
            info!("[dummy] play");
            Ok(())
        } else {
            Err("no program loaded".into())
        };
        Box::pin(std::future::ready(result))
    }

    fn status<'a>(&'a mut self) -> DriverFuture<'a, DriverStatus> {
        Box::pin(std::future::ready(Ok(self.current_status())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_programs() {
        let mut driver = DummyDriver::new();
        driver.run_program("in3.urp", "load").await.unwrap();
        driver.run_program("scan.urp", "scan_samples").await.unwrap();
        assert_eq!(
            driver.history(),
            &[
                ("in3.urp".to_string(), "load".to_string()),
                ("scan.urp".to_string(), "scan_samples".to_string()),
            ]
        );
        let status = driver.status().await.unwrap();
        assert_eq!(status.loaded_program.as_deref(), Some("scan.urp"));
        assert_eq!(status.blocker(), None);
    }

    #[tokio::test]
    async fn test_play_requires_loaded_program() {
        let mut driver = DummyDriver::new();
        assert!(driver.play().await.is_err());
        assert!(driver.pause().await.is_err());
        driver.run_program("reset.urp", "reset").await.unwrap();
        assert!(driver.pause().await.is_ok());
        assert!(driver.play().await.is_ok());
        assert!(driver.stop().await.is_ok());
    }
}
