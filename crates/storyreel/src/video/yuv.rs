use openh264::formats::YUVSource;

/// An RGBA frame converted to planar I420 for the H.264 encoder.
///
/// BT.601 integer conversion; chroma planes are 2x2 block averages, which
/// is why the encoder requires even dimensions.
pub struct I420Frame {
    width: usize,
    height: usize,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl I420Frame {
    pub fn from_rgba(rgba: &[u8], width: u32, height: u32) -> Self {
        let width = width as usize;
        let height = height as usize;
        assert_eq!(rgba.len(), width * height * 4);
        assert!(width % 2 == 0 && height % 2 == 0);

        let mut y = vec![0u8; width * height];
        let mut u = vec![0u8; width * height / 4];
        let mut v = vec![0u8; width * height / 4];

        for row in 0..height {
            for col in 0..width {
                let px = (row * width + col) * 4;
                let (r, g, b) = (
                    rgba[px] as i32,
                    rgba[px + 1] as i32,
                    rgba[px + 2] as i32,
                );
                y[row * width + col] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8;
            }
        }

        let chroma_width = width / 2;
        for row in 0..height / 2 {
            for col in 0..chroma_width {
                // Average the 2x2 block before converting.
                let (mut r, mut g, mut b) = (0i32, 0i32, 0i32);
                for dy in 0..2 {
                    for dx in 0..2 {
                        let px = ((row * 2 + dy) * width + col * 2 + dx) * 4;
                        r += rgba[px] as i32;
                        g += rgba[px + 1] as i32;
                        b += rgba[px + 2] as i32;
                    }
                }
                let (r, g, b) = (r / 4, g / 4, b / 4);
                u[row * chroma_width + col] =
                    (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
                v[row * chroma_width + col] =
                    (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
            }
        }

        Self {
            width,
            height,
            y,
            u,
            v,
        }
    }
}

impl YUVSource for I420Frame {
    fn width(&self) -> i32 {
        self.width as i32
    }

    fn height(&self) -> i32 {
        self.height as i32
    }

    fn y(&self) -> &[u8] {
        &self.y
    }

    fn u(&self) -> &[u8] {
        &self.u
    }

    fn v(&self) -> &[u8] {
        &self.v
    }

    fn y_stride(&self) -> i32 {
        self.width as i32
    }

    fn u_stride(&self) -> i32 {
        (self.width / 2) as i32
    }

    fn v_stride(&self) -> i32 {
        (self.width / 2) as i32
    }
}
