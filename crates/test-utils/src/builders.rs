#![allow(dead_code)]

use std::collections::BTreeMap;

use kit::config::{
    ConfigFile, ConfigSection, HttpGetConfig, ProbeConfig, RawConfigFile, TaskConfig,
    TcpSocketConfig, VolumeConfig,
};
use kit::dag::TaskCatalog;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                env: BTreeMap::new(),
                volume: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_semaphore(mut self, name: &str, capacity: usize) -> Self {
        self.config
            .config
            .semaphores
            .insert(name.to_string(), capacity);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.config.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_volume(mut self, name: &str, host_path: &str) -> Self {
        self.config.volume.insert(
            name.to_string(),
            VolumeConfig {
                host_path: host_path.to_string(),
            },
        );
        self
    }

    pub fn with_grace_period(mut self, seconds: u64) -> Self {
        self.config.config.termination_grace_period_seconds = seconds;
        self
    }

    pub fn with_restart_backoff(mut self, initial: f64, max: f64) -> Self {
        self.config.config.restart_backoff_seconds = initial;
        self.config.config.max_restart_backoff_seconds = max;
        self
    }

    /// The unvalidated document, for exercising validation failures.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    pub fn build_catalog(self) -> (ConfigFile, TaskCatalog) {
        let cfg = self.build();
        let catalog = TaskCatalog::from_config(&cfg).expect("Failed to build task catalog");
        (cfg, catalog)
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    /// `command` is split on whitespace into program and leading arguments.
    pub fn new(command: &str) -> Self {
        Self {
            task: TaskConfig {
                command: command.split_whitespace().map(str::to_string).collect(),
                ..Default::default()
            },
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.task.args.push(arg.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn mutex(mut self, name: &str) -> Self {
        self.task.mutex = Some(name.to_string());
        self
    }

    pub fn semaphore(mut self, name: &str) -> Self {
        self.task.semaphore = Some(name.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.task.ports.push(port);
        self
    }

    pub fn working_dir(mut self, dir: &str) -> Self {
        self.task.working_dir = Some(dir.to_string());
        self
    }

    pub fn liveness(mut self, probe: ProbeConfig) -> Self {
        self.task.liveness_probe = Some(probe);
        self
    }

    pub fn readiness(mut self, probe: ProbeConfig) -> Self {
        self.task.readiness_probe = Some(probe);
        self
    }

    /// Both probes on the same TCP port, which makes the task a service.
    pub fn service_on(self, port: u16) -> Self {
        self.liveness(ProbeConfigBuilder::tcp(port).build())
            .readiness(ProbeConfigBuilder::tcp(port).build())
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Builder for `ProbeConfig`.
pub struct ProbeConfigBuilder {
    probe: ProbeConfig,
}

impl ProbeConfigBuilder {
    pub fn tcp(port: u16) -> Self {
        Self {
            probe: ProbeConfig {
                tcp_socket: Some(TcpSocketConfig { port }),
                ..Default::default()
            },
        }
    }

    pub fn http(port: u16, path: &str) -> Self {
        Self {
            probe: ProbeConfig {
                http_get: Some(HttpGetConfig {
                    port: Some(port),
                    path: Some(path.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    pub fn period(mut self, seconds: u64) -> Self {
        self.probe.period_seconds = Some(seconds);
        self
    }

    pub fn initial_delay(mut self, seconds: u64) -> Self {
        self.probe.initial_delay_seconds = seconds;
        self
    }

    pub fn thresholds(mut self, success: u32, failure: u32) -> Self {
        self.probe.success_threshold = Some(success);
        self.probe.failure_threshold = Some(failure);
        self
    }

    pub fn build(self) -> ProbeConfig {
        self.probe
    }
}
