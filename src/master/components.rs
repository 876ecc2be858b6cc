use log::warn;

use crate::adc::Adc;
use crate::motor::CoarseMotor;
use crate::piezo::Piezo;
use crate::potentiostat::{Potentiostat, Status};

use super::{Component, MasterError};

impl Component for Piezo {
    fn name(&self) -> &str {
        "Piezo"
    }

    fn stop(&self) {
        self.close();
    }

    fn halt(&self) {
        Piezo::halt(self);
    }

    fn make_ready(&self) -> Result<(), MasterError> {
        self.start_monitor().map_err(|e| MasterError::NotReady {
            name: "Piezo".to_string(),
            reason: e.to_string(),
        })
    }
}

impl Component for Adc {
    fn name(&self) -> &str {
        "Adc"
    }

    fn stop(&self) {
        self.close();
    }

    fn halt(&self) {
        self.stop_polling();
    }
}

impl Component for Potentiostat {
    fn name(&self) -> &str {
        "Potentiostat"
    }

    fn stop(&self) {
        self.close();
    }

    fn halt(&self) {
        if self.status() == Status::Running {
            if let Err(e) = self.abort() {
                warn!("potentiostat did not take the abort: {}", e);
            }
        }
    }
}

impl Component for CoarseMotor {
    fn name(&self) -> &str {
        "CoarseMotor"
    }

    fn stop(&self) {
        if let Err(e) = CoarseMotor::halt(self) {
            warn!("{}: halt before close failed: {}", CoarseMotor::name(self), e);
        }
        self.close();
    }

    fn halt(&self) {
        if let Err(e) = CoarseMotor::halt(self) {
            warn!("{}: halt failed: {}", CoarseMotor::name(self), e);
        }
    }
}
