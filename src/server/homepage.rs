//! HTML status page for the management port.

use chrono::Utc;

use crate::cluster::{format_age, ClusterDetails, NodeHealth, NodeRecord, SelectionView};
use crate::config::Platform;
use crate::discovery::ServiceRecord;

/// Everything the status page shows, gathered from cached state only.
pub struct StatusSnapshot {
    pub platform: Platform,
    pub cluster: ClusterDetails,
    pub namespace: String,
    pub current: SelectionView,
    pub nodes: Vec<NodeRecord>,
    pub services: Vec<ServiceRecord>,
}

const STYLE: &str = "\
body { font-family: Arial, sans-serif; margin: 40px; }\n\
table { border-collapse: collapse; width: 100%; margin: 20px 0; }\n\
th, td { border: 1px solid #ddd; padding: 12px; text-align: left; }\n\
th { background-color: #f2f2f2; }\n\
.section { margin: 30px 0; }\n\
h1 { color: #333; }\n\
h2 { color: #666; }\n\
.status-healthy { background-color: #d4edda; padding: 4px 8px; border-radius: 4px; }\n\
.status-unhealthy { background-color: #f8d7da; padding: 4px 8px; border-radius: 4px; }\n\
.status-unknown { background-color: #fff3cd; padding: 4px 8px; border-radius: 4px; }\n\
.info-text { font-size: 12px; color: #666; font-style: italic; margin-top: 8px; }";

pub fn render(snapshot: &StatusSnapshot) -> String {
    let mut page = String::with_capacity(4096);
    page.push_str("<!DOCTYPE html>\n<html>\n<head>\n<title>nodegate</title>\n<style>\n");
    page.push_str(STYLE);
    page.push_str("\n</style>\n</head>\n<body>\n");
    page.push_str(&format!(
        "<h1>nodegate ({})</h1>\n",
        escape(&snapshot.platform.to_string())
    ));

    render_cluster(&mut page, snapshot);
    render_current_node(&mut page, &snapshot.current);
    render_nodes(&mut page, &snapshot.nodes);
    render_services(&mut page, snapshot);

    page.push_str(
        "<div class=\"section\">\n\
         <p><strong>Proxy status:</strong> forwarding traffic to the current cluster node</p>\n\
         <p><strong>Health check:</strong> <a href=\"/health\">/health</a></p>\n\
         </div>\n</body>\n</html>\n",
    );
    page
}

fn render_cluster(page: &mut String, snapshot: &StatusSnapshot) {
    page.push_str("<div class=\"section\">\n<h2>Cluster</h2>\n<table>\n");
    page.push_str("<tr><th>Property</th><th>Value</th></tr>\n");
    for (key, value) in [
        ("Name", snapshot.cluster.name.as_str()),
        ("Location", snapshot.cluster.location.as_str()),
        ("Endpoint", snapshot.cluster.endpoint.as_str()),
        ("Namespace", snapshot.namespace.as_str()),
    ] {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            key,
            escape(value)
        ));
    }
    page.push_str("</table>\n</div>\n");
}

fn render_current_node(page: &mut String, current: &SelectionView) {
    page.push_str("<div class=\"section\">\n<h2>Current Node</h2>\n");
    if current.is_selected() {
        page.push_str("<table>\n<tr><th>Property</th><th>Value</th></tr>\n");
        page.push_str(&format!(
            "<tr><td>Name</td><td>{}</td></tr>\n",
            escape(&current.name)
        ));
        page.push_str(&format!(
            "<tr><td>IP</td><td>{}</td></tr>\n",
            escape(&current.ip)
        ));
        page.push_str(&format!(
            "<tr><td>Status</td><td>{}</td></tr>\n",
            current.status()
        ));
        page.push_str("</table>\n");
    } else {
        page.push_str("<p>No node selected yet</p>\n");
    }
    page.push_str(
        "<div class=\"info-text\">Health checks run every 15 seconds; after 3 consecutive \
         failures the proxy fails over to the oldest healthy node (at most 45 seconds). \
         The node list below refreshes every 2 minutes for display; the active node stays \
         stable unless it degrades.</div>\n</div>\n",
    );
}

fn render_nodes(page: &mut String, nodes: &[NodeRecord]) {
    page.push_str("<div class=\"section\">\n<h2>Cluster Nodes</h2>\n<table>\n");
    page.push_str("<tr><th>Name</th><th>IP</th><th>Status</th><th>Age</th><th>Last Check</th></tr>\n");
    let now = Utc::now();
    for node in nodes {
        let class = match node.health {
            NodeHealth::Healthy => "status-healthy",
            NodeHealth::Unhealthy => "status-unhealthy",
            NodeHealth::Unknown => "status-unknown",
        };
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td>\
             <td><span class=\"{}\">{}</span></td><td>{}</td><td>{}</td></tr>\n",
            escape(&node.name),
            escape(&node.ip),
            class,
            node.health.as_str(),
            format_age(node.age(now)),
            node.last_checked.format("%H:%M:%S"),
        ));
    }
    page.push_str("</table>\n</div>\n");
}

fn render_services(page: &mut String, snapshot: &StatusSnapshot) {
    page.push_str(&format!(
        "<div class=\"section\">\n<h2>NodePort Services ({} namespace)</h2>\n<table>\n",
        escape(&snapshot.namespace)
    ));
    page.push_str(
        "<tr><th>Service</th><th>Namespace</th><th>NodePort</th><th>TargetPort</th><th>Protocol</th></tr>\n",
    );
    for service in &snapshot.services {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&service.name),
            escape(&service.namespace),
            service.node_port,
            service.target_port,
            escape(&service.protocol),
        ));
    }
    page.push_str("</table>\n</div>\n");
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeHealth;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            platform: Platform::Generic,
            cluster: ClusterDetails {
                name: "prod-cluster".to_string(),
                location: "europe-west1".to_string(),
                endpoint: "https://10.0.0.1".to_string(),
            },
            namespace: "apps".to_string(),
            current: SelectionView {
                name: "node-old".to_string(),
                ip: "10.0.1.1".to_string(),
                consecutive_failures: 0,
            },
            nodes: vec![NodeRecord {
                name: "node-old".to_string(),
                ip: "10.0.1.1".to_string(),
                health: NodeHealth::Healthy,
                created_at: Utc::now() - chrono::Duration::hours(24),
                last_checked: Utc::now(),
            }],
            services: vec![ServiceRecord {
                name: "web".to_string(),
                namespace: "apps".to_string(),
                node_port: 30001,
                target_port: 8080,
                protocol: "TCP".to_string(),
            }],
        }
    }

    #[test]
    fn test_render_includes_all_sections() {
        let html = render(&snapshot());

        assert!(html.contains("prod-cluster"));
        assert!(html.contains("node-old"));
        assert!(html.contains("10.0.1.1"));
        assert!(html.contains("status-healthy"));
        assert!(html.contains("30001"));
        assert!(html.contains("apps namespace"));
    }

    #[test]
    fn test_render_without_selection() {
        let mut snapshot = snapshot();
        snapshot.current = SelectionView {
            name: String::new(),
            ip: String::new(),
            consecutive_failures: 0,
        };

        let html = render(&snapshot);
        assert!(html.contains("No node selected yet"));
    }

    #[test]
    fn test_escape_markup_in_names() {
        let mut snapshot = snapshot();
        snapshot.cluster.name = "<script>alert(1)</script>".to_string();

        let html = render(&snapshot);
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
