use crate::catalog::RegisterBank;

/// Host copy of the register values last written to and read from each bank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterImage {
    written: Vec<Vec<u8>>,
    read: Vec<Vec<u8>>,
}

impl Default for RegisterImage {
    fn default() -> Self {
        Self::filled(0)
    }
}

impl RegisterImage {
    /// Every bank holding `value`
    pub fn filled(value: u8) -> Self {
        let banks = || RegisterBank::ALL.iter().map(|b| vec![value; b.size()]).collect();
        Self {
            written: banks(),
            read: banks(),
        }
    }

    pub fn written(&self, bank: RegisterBank) -> &[u8] {
        &self.written[bank as usize]
    }

    pub fn read(&self, bank: RegisterBank) -> &[u8] {
        &self.read[bank as usize]
    }

    pub(crate) fn record_write(&mut self, bank: RegisterBank, data: &[u8]) {
        self.written[bank as usize] = data.to_vec();
    }

    pub(crate) fn record_read(&mut self, bank: RegisterBank, data: &[u8]) {
        self.read[bank as usize] = data.to_vec();
    }

    /// Set the written image of every bank to `value`
    pub(crate) fn fill_written(&mut self, value: u8) {
        for bank in self.written.iter_mut() {
            bank.fill(value);
        }
    }

    /// Record a write of `data` starting at a raw chip address
    pub(crate) fn record_write_at(&mut self, address: u8, data: &[u8]) {
        for (i, &value) in data.iter().enumerate() {
            let Some(addr) = address.checked_add(i as u8) else {
                break;
            };
            if let Some((bank, offset)) = RegisterBank::containing(addr) {
                self.written[bank as usize][offset] = value;
            }
        }
    }

    /// Banks whose last read differs from the last write
    pub fn diverging_banks(&self) -> Vec<RegisterBank> {
        RegisterBank::ALL
            .into_iter()
            .filter(|&b| self.written(b) != self.read(b))
            .collect()
    }
}
