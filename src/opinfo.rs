use serde::{Deserialize, Serialize};

use crate::common::{
    ContractionDimensions, ContractionSizes, DimSize, DispatchKind, ElementType, MatmulShapeType,
    ShapedType,
};

/// Shape and type metadata for a tunable dispatch root op.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum OpInfo {
    Contraction(ContractionOpInfo),
    Convolution(ConvolutionOpInfo),
    Attention(AttentionOpInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContractionOpInfo {
    pub dims: ContractionDimensions,
    pub matmul_size: ContractionSizes,
    pub lhs_type: ShapedType,
    pub rhs_type: ShapedType,
    pub res_type: ShapedType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ConvLayout {
    NhwcHwcf,
    NhwcFhwc,
    NchwFchw,
}

/// Sizes of a 2-D convolution, given in terms of its output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Conv2dShape {
    pub batch: DimSize,
    pub output_height: DimSize,
    pub output_width: DimSize,
    pub output_channels: DimSize,
    pub filter_height: DimSize,
    pub filter_width: DimSize,
    pub input_channels: DimSize,
    pub strides: [DimSize; 2],
    pub dilations: [DimSize; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConvolutionOpInfo {
    pub layout: ConvLayout,
    pub dims: ContractionDimensions,
    pub matmul_size: ContractionSizes,
    pub lhs_type: ShapedType,
    pub rhs_type: ShapedType,
    pub res_type: ShapedType,

    pub batch_sizes: Vec<DimSize>,
    pub output_image_sizes: Vec<DimSize>,
    pub output_channel_sizes: Vec<DimSize>,
    pub filter_loop_sizes: Vec<DimSize>,
    pub input_channel_sizes: Vec<DimSize>,
    pub depth_sizes: Vec<DimSize>,
    pub strides: Vec<DimSize>,
    pub dilations: Vec<DimSize>,
}

/// Dimension group sizes of an attention op with operands `Q=[B,M,K1]`, `K=[B,K2,K1]`,
/// `V=[B,K2,N]` and result `[B,M,N]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AttentionShape {
    pub batch: Vec<DimSize>,
    pub m: Vec<DimSize>,
    pub k1: Vec<DimSize>,
    pub k2: Vec<DimSize>,
    pub n: Vec<DimSize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttentionOpInfo {
    pub domain_rank: usize,
    pub batch_dims: Vec<usize>,
    pub m_dims: Vec<usize>,
    pub n_dims: Vec<usize>,
    pub k1_dims: Vec<usize>,
    pub k2_dims: Vec<usize>,

    pub batch_sizes: Vec<DimSize>,
    pub m_sizes: Vec<DimSize>,
    pub n_sizes: Vec<DimSize>,
    pub k1_sizes: Vec<DimSize>,
    pub k2_sizes: Vec<DimSize>,

    pub query_type: ElementType,
    pub key_type: ElementType,
    pub value_type: ElementType,
    pub output_type: ElementType,

    /// Q's K1 dimension is not innermost.
    pub transposed_q: bool,
    /// K's K1 dimension is not innermost.
    pub transposed_k: bool,
    /// V's K2 dimension is not innermost.
    pub transposed_v: bool,

    pub qk_matmul: MatmulShapeType,
    pub pv_matmul: MatmulShapeType,
}

impl OpInfo {
    pub fn kind(&self) -> DispatchKind {
        match self {
            OpInfo::Contraction(_) => DispatchKind::Contraction,
            OpInfo::Convolution(_) => DispatchKind::Conv,
            OpInfo::Attention(_) => DispatchKind::Attention,
        }
    }
}

impl ContractionOpInfo {
    pub fn new(
        dims: ContractionDimensions,
        matmul_size: ContractionSizes,
        lhs_type: ShapedType,
        rhs_type: ShapedType,
        res_type: ShapedType,
    ) -> Self {
        assert!(!dims.m.is_empty(), "no M contraction dimensions");
        assert!(!dims.n.is_empty(), "no N contraction dimensions");
        assert!(!dims.k.is_empty(), "no K contraction dimensions");
        assert_eq!(dims.m.len(), matmul_size.m.len());
        assert_eq!(dims.n.len(), matmul_size.n.len());
        assert_eq!(dims.k.len(), matmul_size.k.len());
        assert_eq!(dims.batch.len(), matmul_size.b.len());
        ContractionOpInfo {
            dims,
            matmul_size,
            lhs_type,
            rhs_type,
            res_type,
        }
    }

    /// A plain `[M,K] x [K,N] -> [M,N]` matmul.
    pub fn matmul(
        m: DimSize,
        n: DimSize,
        k: DimSize,
        lhs: ElementType,
        rhs: ElementType,
        res: ElementType,
    ) -> Self {
        ContractionOpInfo::new(
            ContractionDimensions {
                batch: vec![],
                m: vec![0],
                n: vec![1],
                k: vec![2],
            },
            ContractionSizes {
                m: vec![m],
                n: vec![n],
                k: vec![k],
                b: vec![],
            },
            ShapedType::new(vec![m, k], lhs),
            ShapedType::new(vec![k, n], rhs),
            ShapedType::new(vec![m, n], res),
        )
    }

    /// A `[B,M,K] x [B,K,N] -> [B,M,N]` batch matmul.
    pub fn batch_matmul(
        b: DimSize,
        m: DimSize,
        n: DimSize,
        k: DimSize,
        lhs: ElementType,
        rhs: ElementType,
        res: ElementType,
    ) -> Self {
        ContractionOpInfo::new(
            ContractionDimensions {
                batch: vec![0],
                m: vec![1],
                n: vec![2],
                k: vec![3],
            },
            ContractionSizes {
                m: vec![m],
                n: vec![n],
                k: vec![k],
                b: vec![b],
            },
            ShapedType::new(vec![b, m, k], lhs),
            ShapedType::new(vec![b, k, n], rhs),
            ShapedType::new(vec![b, m, n], res),
        )
    }
}

impl Conv2dShape {
    pub fn input_height(&self) -> DimSize {
        (self.output_height - 1) * self.strides[0] + (self.filter_height - 1) * self.dilations[0] + 1
    }

    pub fn input_width(&self) -> DimSize {
        (self.output_width - 1) * self.strides[1] + (self.filter_width - 1) * self.dilations[1] + 1
    }
}

impl ConvolutionOpInfo {
    /// Describes a 2-D convolution as a contraction: the batch and output image
    /// dimensions are M, the output channels are N, and the filter window and
    /// input channels are K.
    pub fn new(
        layout: ConvLayout,
        shape: &Conv2dShape,
        lhs: ElementType,
        rhs: ElementType,
        res: ElementType,
    ) -> Self {
        let Conv2dShape {
            batch: n,
            output_height: oh,
            output_width: ow,
            output_channels: f,
            filter_height: fh,
            filter_width: fw,
            input_channels: c,
            ..
        } = *shape;
        let (ih, iw) = (shape.input_height(), shape.input_width());

        // Loop order for each layout, followed by the operand shapes.
        let (dims, lhs_shape, rhs_shape, res_shape) = match layout {
            ConvLayout::NhwcHwcf => (
                // (n, oh, ow, f, fh, fw, c)
                ContractionDimensions {
                    batch: vec![],
                    m: vec![0, 1, 2],
                    n: vec![3],
                    k: vec![4, 5, 6],
                },
                vec![n, ih, iw, c],
                vec![fh, fw, c, f],
                vec![n, oh, ow, f],
            ),
            ConvLayout::NhwcFhwc => (
                ContractionDimensions {
                    batch: vec![],
                    m: vec![0, 1, 2],
                    n: vec![3],
                    k: vec![4, 5, 6],
                },
                vec![n, ih, iw, c],
                vec![f, fh, fw, c],
                vec![n, oh, ow, f],
            ),
            ConvLayout::NchwFchw => (
                // (n, f, oh, ow, c, fh, fw)
                ContractionDimensions {
                    batch: vec![],
                    m: vec![0, 2, 3],
                    n: vec![1],
                    k: vec![5, 6, 4],
                },
                vec![n, c, ih, iw],
                vec![f, c, fh, fw],
                vec![n, f, oh, ow],
            ),
        };

        ConvolutionOpInfo {
            layout,
            dims,
            matmul_size: ContractionSizes {
                m: vec![n, oh, ow],
                n: vec![f],
                k: vec![fh, fw, c],
                b: vec![],
            },
            lhs_type: ShapedType::new(lhs_shape, lhs),
            rhs_type: ShapedType::new(rhs_shape, rhs),
            res_type: ShapedType::new(res_shape, res),
            batch_sizes: vec![n],
            output_image_sizes: vec![oh, ow],
            output_channel_sizes: vec![f],
            filter_loop_sizes: vec![fh, fw],
            input_channel_sizes: vec![c],
            depth_sizes: vec![],
            strides: shape.strides.to_vec(),
            dilations: shape.dilations.to_vec(),
        }
    }

    pub fn nhwc_hwcf(
        shape: &Conv2dShape,
        lhs: ElementType,
        rhs: ElementType,
        res: ElementType,
    ) -> Self {
        ConvolutionOpInfo::new(ConvLayout::NhwcHwcf, shape, lhs, rhs, res)
    }

    /// Only `nhwc_hwcf` convolutions have verified constraint generation.
    pub fn has_supported_layout(&self) -> bool {
        self.layout == ConvLayout::NhwcHwcf
    }
}

impl AttentionOpInfo {
    /// Builds the descriptor for the iteration domain `(batch.., m.., k1.., k2.., n..)`.
    pub fn new(
        shape: &AttentionShape,
        query_type: ElementType,
        key_type: ElementType,
        value_type: ElementType,
        output_type: ElementType,
        transposed_k: bool,
        transposed_v: bool,
    ) -> Self {
        assert!(!shape.m.is_empty(), "no M dimensions in attention op");
        assert!(!shape.n.is_empty(), "no N dimensions in attention op");
        assert!(!shape.k1.is_empty(), "no K1 dimensions in attention op");
        assert!(!shape.k2.is_empty(), "no K2 dimensions in attention op");

        let mut next = 0;
        let mut take = |count: usize| {
            let dims = (next..next + count).collect::<Vec<_>>();
            next += count;
            dims
        };
        let batch_dims = take(shape.batch.len());
        let m_dims = take(shape.m.len());
        let k1_dims = take(shape.k1.len());
        let k2_dims = take(shape.k2.len());
        let n_dims = take(shape.n.len());
        let domain_rank = next;

        let m = shape.m[shape.m.len() - 1];
        let n = shape.n[shape.n.len() - 1];
        let k1 = shape.k1[shape.k1.len() - 1];
        let k2 = shape.k2[shape.k2.len() - 1];

        AttentionOpInfo {
            domain_rank,
            batch_dims,
            m_dims,
            n_dims,
            k1_dims,
            k2_dims,
            batch_sizes: shape.batch.clone(),
            m_sizes: shape.m.clone(),
            n_sizes: shape.n.clone(),
            k1_sizes: shape.k1.clone(),
            k2_sizes: shape.k2.clone(),
            query_type,
            key_type,
            value_type,
            output_type,
            transposed_q: false,
            transposed_k,
            transposed_v,
            qk_matmul: MatmulShapeType {
                m,
                n: k2,
                k: k1,
                lhs_type: query_type,
                rhs_type: key_type,
                acc_type: ElementType::F32,
            },
            pv_matmul: MatmulShapeType {
                m,
                n,
                k: k2,
                lhs_type: value_type,
                rhs_type: value_type,
                acc_type: output_type,
            },
        }
    }
}

impl From<ContractionOpInfo> for OpInfo {
    fn from(value: ContractionOpInfo) -> Self {
        OpInfo::Contraction(value)
    }
}

impl From<ConvolutionOpInfo> for OpInfo {
    fn from(value: ConvolutionOpInfo) -> Self {
        OpInfo::Convolution(value)
    }
}

impl From<AttentionOpInfo> for OpInfo {
    fn from(value: AttentionOpInfo) -> Self {
        OpInfo::Attention(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ElementType::*;

    pub(crate) fn conv_shape() -> Conv2dShape {
        Conv2dShape {
            batch: 2,
            output_height: 64,
            output_width: 64,
            output_channels: 320,
            filter_height: 3,
            filter_width: 3,
            input_channels: 16,
            strides: [1, 1],
            dilations: [1, 1],
        }
    }

    #[test]
    fn test_matmul_descriptor() {
        let info = ContractionOpInfo::matmul(2048, 10240, 1280, F16, F16, F32);
        assert_eq!(info.lhs_type.shape, vec![2048, 1280]);
        assert_eq!(info.rhs_type.shape, vec![1280, 10240]);
        assert_eq!(info.res_type.shape, vec![2048, 10240]);
        assert_eq!(info.dims.num_loops(), 3);
        assert_eq!(OpInfo::from(info).kind(), DispatchKind::Contraction);
    }

    #[test]
    #[should_panic(expected = "no K contraction dimensions")]
    fn test_contraction_without_k_panics() {
        ContractionOpInfo::new(
            ContractionDimensions {
                batch: vec![],
                m: vec![0],
                n: vec![1],
                k: vec![],
            },
            ContractionSizes {
                m: vec![4],
                n: vec![4],
                k: vec![],
                b: vec![],
            },
            ShapedType::new(vec![4], F16),
            ShapedType::new(vec![4], F16),
            ShapedType::new(vec![4, 4], F32),
        );
    }

    #[test]
    fn test_nhwc_hwcf_conv_maps_to_contraction() {
        let info = ConvolutionOpInfo::nhwc_hwcf(&conv_shape(), F16, F16, F32);
        assert!(info.has_supported_layout());
        assert_eq!(info.dims.m, vec![0, 1, 2]);
        assert_eq!(info.dims.n, vec![3]);
        assert_eq!(info.dims.k, vec![4, 5, 6]);
        assert_eq!(info.matmul_size.m, vec![2, 64, 64]);
        assert_eq!(info.matmul_size.k, vec![3, 3, 16]);
        assert_eq!(info.lhs_type.shape, vec![2, 66, 66, 16]);
        assert_eq!(info.rhs_type.shape, vec![3, 3, 16, 320]);
    }

    #[test]
    fn test_strided_conv_input_size() {
        let shape = Conv2dShape {
            strides: [2, 2],
            dilations: [2, 1],
            ..conv_shape()
        };
        assert_eq!(shape.input_height(), 63 * 2 + 2 * 2 + 1);
        assert_eq!(shape.input_width(), 63 * 2 + 2 + 1);
    }

    #[test]
    fn test_nchw_conv_is_not_supported() {
        let info = ConvolutionOpInfo::new(ConvLayout::NchwFchw, &conv_shape(), F16, F16, F32);
        assert!(!info.has_supported_layout());
    }

    #[test]
    fn test_attention_derives_matmul_shapes() {
        let shape = AttentionShape {
            batch: vec![2],
            m: vec![1024],
            k1: vec![64],
            k2: vec![1024],
            n: vec![64],
        };
        let info = AttentionOpInfo::new(&shape, F16, F16, F16, F16, false, false);
        assert_eq!(info.domain_rank, 5);
        assert_eq!(info.batch_dims, vec![0]);
        assert_eq!(info.m_dims, vec![1]);
        assert_eq!(info.k1_dims, vec![2]);
        assert_eq!(info.k2_dims, vec![3]);
        assert_eq!(info.n_dims, vec![4]);
        assert_eq!((info.qk_matmul.m, info.qk_matmul.n, info.qk_matmul.k), (1024, 1024, 64));
        assert_eq!(info.qk_matmul.acc_type, F32);
        assert_eq!((info.pv_matmul.m, info.pv_matmul.n, info.pv_matmul.k), (1024, 64, 1024));
        assert_eq!(info.pv_matmul.acc_type, F16);
    }
}
