//! Bit fields of the PICMIC0 registers.
//!
//! The single-byte banks are wrapped in newtypes with one accessor pair per
//! field. The pixel sequencer bank is addressed by byte offset, its 16-bit
//! values being stored LSB first.

/// Position of a field inside a register byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub shift: u8,
    pub width: u8,
}

impl Field {
    pub const fn new(shift: u8, width: u8) -> Self {
        Self { shift, width }
    }

    pub const fn mask(self) -> u8 {
        (((1u16 << self.width) - 1) as u8) << self.shift
    }

    pub const fn get(self, byte: u8) -> u8 {
        (byte & self.mask()) >> self.shift
    }

    /// `byte` with the field replaced by `value`; extra high bits are dropped
    pub const fn set(self, byte: u8, value: u8) -> u8 {
        (byte & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

/// Pixel matrix rows
pub const MATRIX_ROWS: usize = 128;
/// Pixel matrix columns
pub const MATRIX_COLS: usize = 54;

macro_rules! register_byte {
    ($(#[$doc:meta])* $name:ident { $($(#[$fdoc:meta])* $field:ident, $setter:ident, $shift:expr, $width:expr;)* }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub u8);

        impl $name {
            $(
                $(#[$fdoc])*
                pub fn $field(self) -> u8 {
                    Field::new($shift, $width).get(self.0)
                }

                pub fn $setter(mut self, value: u8) -> Self {
                    self.0 = Field::new($shift, $width).set(self.0, value);
                    self
                }
            )*

            pub fn bits(self) -> u8 {
                self.0
            }
        }

        impl From<u8> for $name {
            fn from(byte: u8) -> Self {
                Self(byte)
            }
        }
    };
}

register_byte! {
    /// `GLB_CMD`
    GlobalCommand {
        /// Enable external pulse input
        en_ext_pulse, with_en_ext_pulse, 0, 1;
        ext_pulse, with_ext_pulse, 1, 1;
        /// Reset frame counter
        rst_fr_cnt, with_rst_fr_cnt, 2, 1;
        start_seq, with_start_seq, 3, 1;
    }
}

register_byte! {
    /// `TEST_S_CTRL`, test structure control
    TestStructureControl {
        sw0, with_sw0, 0, 1;
        sw1, with_sw1, 1, 1;
        en_cm, with_en_cm, 2, 1;
        en_cc, with_en_cc, 3, 1;
        ena_cm1, with_ena_cm1, 4, 1;
        ena_d2p, with_ena_d2p, 5, 1;
        ena_d1p, with_ena_d1p, 6, 1;
    }
}

register_byte! {
    /// `PIX_CONF_ROW`
    PixelConfigRow {
        sel_row, with_sel_row, 0, 7;
        sel_all_row, with_sel_all_row, 7, 1;
    }
}

register_byte! {
    /// `CONF_COL`
    PixelConfigCol {
        sel_col, with_sel_col, 0, 6;
        /// 1 selects all columns, 2 deselects all columns
        sel_desel_all_col, with_sel_desel_all_col, 6, 2;
    }
}

register_byte! {
    /// `CONF_DATA`, written into the selected pixels
    PixelConfigData {
        /// Current adjustment
        i_adj, with_i_adj, 0, 3;
        ena_cm, with_ena_cm, 3, 1;
        sw0, with_sw0, 4, 1;
        sw1, with_sw1, 5, 1;
        ena_cc, with_ena_cc, 6, 1;
        activate_vpulse, with_activate_vpulse, 7, 1;
    }
}

impl PixelConfigRow {
    pub fn row(row: u8) -> Self {
        Self::default().with_sel_row(row)
    }

    pub fn all() -> Self {
        Self::default().with_sel_all_row(1)
    }
}

impl PixelConfigCol {
    pub const SELECT_ALL: u8 = 0x40;
    pub const DESELECT_ALL: u8 = 0x80;

    pub fn col(col: u8) -> Self {
        Self::default().with_sel_col(col)
    }

    pub fn select_all() -> Self {
        Self(Self::SELECT_ALL)
    }

    pub fn deselect_all() -> Self {
        Self(Self::DESELECT_ALL)
    }
}

/// Offset of a single-byte `PIX_SEQ` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqByte(usize);

/// Offset of the LSB of a 16-bit `PIX_SEQ` field, the MSB follows it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqWord(usize);

/// `PIX_SEQ`, the 24-byte pixel sequencer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSequence(pub [u8; 24]);

impl Default for PixelSequence {
    fn default() -> Self {
        Self([0; 24])
    }
}

impl PixelSequence {
    pub const FLUSH_MOD: SeqByte = SeqByte(0);
    pub const MARKER_MOD: SeqByte = SeqByte(2);
    pub const PULSE_MOD: SeqByte = SeqByte(4);
    pub const LOAD_WIDTH: SeqByte = SeqByte(5);

    pub const LOAD_P: SeqWord = SeqWord(6);
    pub const FLUSH_P: SeqWord = SeqWord(8);
    pub const APULSE_P: SeqWord = SeqWord(10);
    pub const DPULSE_P: SeqWord = SeqWord(12);
    pub const RDPIX_MASK: SeqWord = SeqWord(14);
    pub const MAX_FRAME: SeqWord = SeqWord(16);
    pub const POLARITY: SeqWord = SeqWord(18);
    pub const MARKER_1: SeqWord = SeqWord(20);
    pub const MARKER_2: SeqWord = SeqWord(22);

    pub fn byte(&self, field: SeqByte) -> u8 {
        self.0[field.0]
    }

    pub fn set_byte(&mut self, field: SeqByte, value: u8) {
        self.0[field.0] = value;
    }

    pub fn word(&self, field: SeqWord) -> u16 {
        u16::from_le_bytes([self.0[field.0], self.0[field.0 + 1]])
    }

    pub fn set_word(&mut self, field: SeqWord, value: u16) {
        self.0[field.0..field.0 + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for PixelSequence {
    type Error = crate::error::ValidationError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        crate::catalog::RegisterBank::PixSeq.check_len(bytes.len())?;
        let mut seq = Self::default();
        seq.0.copy_from_slice(bytes);
        Ok(seq)
    }
}
