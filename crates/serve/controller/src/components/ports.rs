use k8s_openapi::api::core::v1::{Container, ContainerPort};

/// Exposes `port` on a container that declares no ports yet.
///
/// Returns whether the container was changed.
pub fn ensure_port(container: &mut Container, port: u16) -> bool {
    match &container.ports {
        Some(ports) if !ports.is_empty() => false,
        _ => {
            container.ports = Some(vec![ContainerPort {
                container_port: port.into(),
                ..Default::default()
            }]);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expose_port_once() {
        let mut container = Container::default();

        assert!(ensure_port(&mut container, 8081));
        assert!(!ensure_port(&mut container, 8081));

        let ports = container.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].container_port, 8081);
    }

    #[test]
    fn keep_declared_ports() {
        let mut container = Container {
            ports: Some(vec![ContainerPort {
                container_port: 9000,
                ..Default::default()
            }]),
            ..Default::default()
        };

        assert!(!ensure_port(&mut container, 8082));
        assert_eq!(container.ports.unwrap()[0].container_port, 9000);
    }

    #[test]
    fn fill_empty_port_list() {
        let mut container = Container {
            ports: Some(vec![]),
            ..Default::default()
        };

        assert!(ensure_port(&mut container, 8082));
        assert_eq!(container.ports.unwrap()[0].container_port, 8082);
    }
}
