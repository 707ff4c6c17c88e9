use crate::error::{CoreError, Result};
use crate::types::{
    AllocatedPort, ExposurePoint, ExposureSpec, ExposureType, NodeOs, Protocol, SecurityProfile,
    Workload, WorkloadSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Pod, PodOS, PodSpec, SecurityContext, Service, ServicePort,
    ServiceSpec, WindowsSecurityContextOptions,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Label used by the scheduler to place pods on nodes of a given OS
pub const NODE_OS_LABEL: &str = "kubernetes.io/os";

/// Build the Service object submitted for an exposure spec
pub fn service_from_spec(spec: &ExposureSpec) -> Service {
    let ports = spec
        .ports
        .iter()
        .map(|p| ServicePort {
            name: p.name.clone(),
            port: i32::from(p.port),
            target_port: Some(IntOrString::Int(i32::from(p.target_port))),
            protocol: Some(p.protocol.as_str().to_string()),
            node_port: p.node_port.map(i32::from),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(spec.exposure_type.as_str().to_string()),
            selector: Some(spec.selector.clone()),
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    }
}

/// Read an exposure point back from a Service returned by the control plane
pub fn exposure_from_service(service: &Service) -> Result<ExposurePoint> {
    let name = service
        .metadata
        .name
        .clone()
        .ok_or_else(|| CoreError::missing_field("Service", "metadata.name"))?;
    let namespace = service
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let resource = format!("Service {}/{}", namespace, name);

    let spec = service
        .spec
        .as_ref()
        .ok_or_else(|| CoreError::missing_field(&resource, "spec"))?;

    let exposure_type = ExposureType::from_service_type(spec.type_.as_deref()).ok_or_else(|| {
        CoreError::invalid_spec(
            &resource,
            format!("unsupported type {:?}", spec.type_),
            "Only ClusterIP, NodePort and LoadBalancer services can be probed",
        )
    })?;

    let mut ports = Vec::new();
    for p in spec.ports.as_deref().unwrap_or_default() {
        let port = to_port(p.port, &resource, "spec.ports[].port")?;
        let target_port = match &p.target_port {
            Some(IntOrString::Int(n)) => to_port(*n, &resource, "spec.ports[].targetPort")?,
            Some(IntOrString::String(name)) => {
                return Err(CoreError::invalid_spec(
                    &resource,
                    format!("named targetPort '{}' on port {}", name, port),
                    "Named target ports resolve per pod; declare a numeric targetPort",
                ));
            }
            None => port,
        };
        let protocol = Protocol::from_service_protocol(p.protocol.as_deref()).ok_or_else(|| {
            CoreError::invalid_spec(
                &resource,
                format!("unsupported protocol {:?}", p.protocol),
                "Use TCP, UDP or SCTP",
            )
        })?;
        let node_port = match p.node_port {
            Some(n) if n != 0 => Some(to_port(n, &resource, "spec.ports[].nodePort")?),
            _ => None,
        };

        ports.push(AllocatedPort {
            name: p.name.clone(),
            port,
            target_port,
            protocol,
            node_port,
        });
    }

    Ok(ExposurePoint {
        namespace,
        name,
        uid: service.metadata.uid.clone(),
        selector: spec.selector.clone().unwrap_or_default(),
        ports,
        exposure_type,
        cluster_ip: spec.cluster_ip.clone(),
    })
}

/// Build the Pod object submitted for a workload spec
pub fn pod_from_spec(spec: &WorkloadSpec) -> Pod {
    let security_context = match spec.node_os {
        Some(NodeOs::Windows) => windows_security_context(&spec.security),
        _ => linux_security_context(&spec.security),
    };

    let container = Container {
        name: spec.container_name.clone(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: (!spec.command.is_empty()).then(|| spec.command.clone()),
        args: (!spec.args.is_empty()).then(|| spec.args.clone()),
        ports: spec.container_port.map(|port| {
            vec![ContainerPort {
                container_port: i32::from(port),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]
        }),
        security_context: Some(security_context),
        termination_message_policy: Some("File".to_string()),
        ..Default::default()
    };

    let node_selector = spec.node_os.map(|os| {
        [(NODE_OS_LABEL.to_string(), os.label_value().to_string())]
            .into_iter()
            .collect()
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: (!spec.labels.is_empty()).then(|| spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some(spec.restart_policy.as_str().to_string()),
            dns_policy: Some("ClusterFirst".to_string()),
            node_selector,
            node_name: spec.node_name.clone(),
            os: spec.node_os.map(|os| PodOS {
                name: os.label_value().to_string(),
            }),
            host_network: spec.host_network.then_some(true),
            ..Default::default()
        }),
        status: None,
    }
}

fn linux_security_context(security: &SecurityProfile) -> SecurityContext {
    SecurityContext {
        privileged: Some(security.privileged),
        allow_privilege_escalation: security.allow_privilege_escalation,
        run_as_non_root: security.run_as_non_root,
        run_as_user: security.run_as_user,
        read_only_root_filesystem: Some(security.read_only_root_filesystem),
        ..Default::default()
    }
}

/// Windows pods reject the Linux-only fields, so only the Windows options are set
fn windows_security_context(security: &SecurityProfile) -> SecurityContext {
    let windows_options = (security.windows_host_process || security.run_as_user_name.is_some())
        .then(|| WindowsSecurityContextOptions {
            host_process: security.windows_host_process.then_some(true),
            run_as_user_name: security.run_as_user_name.clone(),
            ..Default::default()
        });

    SecurityContext {
        run_as_non_root: security.run_as_non_root,
        windows_options,
        ..Default::default()
    }
}

/// Read a workload back from a Pod returned by the control plane
pub fn workload_from_pod(pod: &Pod) -> Result<Workload> {
    let name = pod
        .metadata
        .name
        .clone()
        .ok_or_else(|| CoreError::missing_field("Pod", "metadata.name"))?;
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());

    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| CoreError::missing_field(format!("Pod {}/{}", namespace, name), "spec"))?;
    let container = spec.containers.first().ok_or_else(|| {
        CoreError::missing_field(format!("Pod {}/{}", namespace, name), "spec.containers")
    })?;

    Ok(Workload {
        uid: pod.metadata.uid.clone(),
        container_name: container.name.clone(),
        image: container.image.clone().unwrap_or_default(),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        node_name: spec.node_name.clone(),
        pod_ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
        phase: pod.status.as_ref().and_then(|s| s.phase.clone()),
        namespace,
        name,
    })
}

fn to_port(value: i32, resource: &str, field: &str) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| {
            CoreError::invalid_spec(
                resource,
                format!("{} = {} is not a valid port", field, value),
                "Ports must be between 1 and 65535",
            )
        })
}
