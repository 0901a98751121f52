//! MQTT topics status changes are published on

const PREFIX: &str = "shipyard";

pub struct Topics;

impl Topics {
    /// Every status change of one deployment
    pub fn deployment_status(deployment_id: &str) -> String {
        format!("{}/deployments/{}/status", PREFIX, deployment_id)
    }

    /// Every status change of any deployment of a project
    pub fn project_deployments(project_id: &str) -> String {
        format!("{}/projects/{}/deployments", PREFIX, project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        assert_eq!(
            Topics::deployment_status("d-123"),
            "shipyard/deployments/d-123/status"
        );
        assert_eq!(
            Topics::project_deployments("p1"),
            "shipyard/projects/p1/deployments"
        );
    }
}
