//! Control model variants.
//!
//! | Model           | Select              | Operate | Termination |
//! |-----------------|---------------------|---------|-------------|
//! | status-only     | rejected            |         |             |
//! | direct normal   |                     | yes     |             |
//! | SBO normal      | select              | yes     |             |
//! | direct enhanced |                     | yes     | expected    |
//! | SBO enhanced    | select with value   | yes     | expected    |

use async_trait::async_trait;
use iecgate_client::IedConnection;
use iecgate_core::error::{ConnectionError, ControlError};
use iecgate_core::{ControlModel, ControlValue, ObjectReference};
use tracing::debug;

/// Progress of an outstanding command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    /// The object is reserved, operate not yet sent
    Selected,
    /// Operate sent, waiting for the confirmation
    Operated,
    /// Positively confirmed, waiting for the termination
    AwaitingTermination,
}

/// Issue a command on a link according to the control model
#[async_trait]
pub trait IssueCommand {
    /// Phase reached when the first request of the sequence succeeds
    fn initial_phase(&self) -> CommandPhase;

    async fn issue(
        &self,
        link: &dyn IedConnection,
        reference: &ObjectReference,
        value: &ControlValue,
    ) -> Result<CommandPhase, ControlError>;
}

fn refused(reference: &ObjectReference, error: ConnectionError) -> ControlError {
    match error {
        ConnectionError::NotConnected => ControlError::NoActiveConnection,
        other => ControlError::Refused {
            reference: reference.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl IssueCommand for ControlModel {
    fn initial_phase(&self) -> CommandPhase {
        if self.is_select_before_operate() {
            CommandPhase::Selected
        } else {
            CommandPhase::Operated
        }
    }

    async fn issue(
        &self,
        link: &dyn IedConnection,
        reference: &ObjectReference,
        value: &ControlValue,
    ) -> Result<CommandPhase, ControlError> {
        match self {
            ControlModel::StatusOnly => {
                return Err(ControlError::NotControllable {
                    reference: reference.to_string(),
                })
            }
            ControlModel::SboNormal => {
                link.select(reference, None)
                    .await
                    .map_err(|e| refused(reference, e))?;
            }
            ControlModel::SboEnhanced => {
                link.select(reference, Some(value))
                    .await
                    .map_err(|e| refused(reference, e))?;
            }
            ControlModel::DirectNormal | ControlModel::DirectEnhanced => {}
        }

        if self.is_select_before_operate() {
            debug!(reference = %reference, "Selected");
        }

        link.operate(reference, value)
            .await
            .map_err(|e| refused(reference, e))?;

        debug!(reference = %reference, model = %self, value = %value, "Operated");
        Ok(CommandPhase::Operated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iecgate_client::sim::{ControlService, SimulatedConnector, SimulatedIed};
    use iecgate_client::{IedConnector, IedLink};
    use iecgate_core::ConnectionEndpoint;
    use std::sync::Arc;

    async fn link_to(ied: &Arc<SimulatedIed>) -> IedLink {
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        SimulatedConnector::new()
            .with(&endpoint, Arc::clone(ied))
            .connect(&endpoint)
            .await
            .unwrap()
    }

    fn services(ied: &SimulatedIed) -> Vec<(ControlService, Option<ControlValue>)> {
        ied.calls()
            .into_iter()
            .map(|call| (call.service, call.value))
            .collect()
    }

    #[tokio::test]
    async fn test_sequences_per_model() {
        let reference = ObjectReference::from("LD/GGIO1.SPCSO1");
        let value = ControlValue::Bool(true);

        let expected = [
            (
                ControlModel::DirectNormal,
                vec![(ControlService::Operate, Some(value.clone()))],
            ),
            (
                ControlModel::DirectEnhanced,
                vec![(ControlService::Operate, Some(value.clone()))],
            ),
            (
                ControlModel::SboNormal,
                vec![
                    (ControlService::Select, None),
                    (ControlService::Operate, Some(value.clone())),
                ],
            ),
            (
                ControlModel::SboEnhanced,
                vec![
                    (ControlService::Select, Some(value.clone())),
                    (ControlService::Operate, Some(value.clone())),
                ],
            ),
        ];

        for (model, sequence) in expected {
            let ied = SimulatedIed::new("IED1");
            let link = link_to(&ied).await;
            let phase = model
                .issue(link.connection.as_ref(), &reference, &value)
                .await
                .unwrap();
            assert_eq!(phase, CommandPhase::Operated);
            assert_eq!(services(&ied), sequence, "{}", model);
        }
    }

    #[tokio::test]
    async fn test_status_only_is_rejected() {
        let ied = SimulatedIed::new("IED1");
        let link = link_to(&ied).await;
        let result = ControlModel::StatusOnly
            .issue(
                link.connection.as_ref(),
                &ObjectReference::from("LD/GGIO1.SPCSO1"),
                &ControlValue::Bool(true),
            )
            .await;
        assert!(matches!(result, Err(ControlError::NotControllable { .. })));
        assert!(ied.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refused_select_stops_sequence() {
        let ied = SimulatedIed::new("IED1");
        ied.refuse_controls(true);
        let link = link_to(&ied).await;
        let result = ControlModel::SboNormal
            .issue(
                link.connection.as_ref(),
                &ObjectReference::from("LD/GGIO1.SPCSO1"),
                &ControlValue::Bool(true),
            )
            .await;
        assert!(matches!(result, Err(ControlError::Refused { .. })));
        assert_eq!(ied.calls().len(), 1);
    }

    #[test]
    fn test_initial_phase() {
        assert_eq!(ControlModel::SboEnhanced.initial_phase(), CommandPhase::Selected);
        assert_eq!(ControlModel::DirectNormal.initial_phase(), CommandPhase::Operated);
    }
}
